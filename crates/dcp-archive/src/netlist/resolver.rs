//! Name to address resolution with ordered fallback layers.

use crate::message::DcpAddress;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a platform display name to its address.
pub trait NameResolver: Send + Sync {
    /// Resolves `name`, or returns `None` if unknown.
    fn resolve(&self, name: &str) -> Option<DcpAddress>;
}

/// Local name map backed by an ordered list of parent layers.
///
/// Lookups are case-insensitive. A name missing locally is tried against each
/// layer in the order the layers were added.
#[derive(Default, Clone)]
pub struct NameMapper {
    local: HashMap<String, DcpAddress>,
    layers: Vec<Arc<dyn NameResolver>>,
}

impl NameMapper {
    /// Creates an empty mapper with no layers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fallback layer after any existing ones.
    pub fn with_layer(mut self, layer: Arc<dyn NameResolver>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Adds or replaces a local mapping.
    pub fn insert(&mut self, name: &str, address: DcpAddress) {
        self.local.insert(name.to_lowercase(), address);
    }

    /// Number of local mappings.
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Returns true if there are no local mappings.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

impl NameResolver for NameMapper {
    fn resolve(&self, name: &str) -> Option<DcpAddress> {
        if let Some(address) = self.local.get(&name.to_lowercase()) {
            return Some(address.clone());
        }
        self.layers.iter().find_map(|layer| layer.resolve(name))
    }
}

impl std::fmt::Debug for NameMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameMapper")
            .field("local", &self.local)
            .field("layers", &self.layers.len())
            .finish()
    }
}
