//! Network list files.
//!
//! One platform per line:
//!
//! ```text
//! # comment
//! CE31A2B4:BIGRIVER Big River at the dam
//! CE31A2C2
//! ```

use crate::error::Result;
use crate::message::DcpAddress;
use std::fs;
use std::path::Path;

/// Extension of network list files.
pub const NETLIST_EXTENSION: &str = "nl";

/// One platform in a network list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkListItem {
    /// Platform address.
    pub address: DcpAddress,
    /// Display name, may be empty.
    pub name: String,
    /// Free text, may be empty.
    pub description: String,
}

/// A named list of platforms.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkList {
    name: String,
    items: Vec<NetworkListItem>,
}

impl NetworkList {
    /// Creates an empty list.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Parses list text. Malformed lines are skipped.
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut list = Self::new(name);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (address, rest) = line.split_once(':').unwrap_or((line, ""));
            let address = DcpAddress::new(address);
            if address.is_empty() {
                continue;
            }
            let rest = rest.trim();
            let (name, description) = rest
                .split_once(char::is_whitespace)
                .unwrap_or((rest, ""));
            list.push(NetworkListItem {
                address,
                name: name.to_string(),
                description: description.trim().to_string(),
            });
        }
        list
    }

    /// Loads a list file; the list is named after the file stem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Ok(Self::parse(name, &text))
    }

    /// Appends an item.
    pub fn push(&mut self, item: NetworkListItem) {
        self.items.push(item);
    }

    /// List name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Items in file order.
    pub fn items(&self) -> &[NetworkListItem] {
        &self.items
    }

    /// Addresses in file order.
    pub fn addresses(&self) -> impl Iterator<Item = &DcpAddress> + '_ {
        self.items.iter().map(|item| &item.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_lines() {
        let text = "# rivers\n\nCE31A2B4:BIGRIVER Big River at the dam\nce31a2c2\n  :nothing\n";
        let list = NetworkList::parse("rivers", text);
        assert_eq!(list.items().len(), 2);
        assert_eq!(list.items()[0].name, "BIGRIVER");
        assert_eq!(list.items()[0].description, "Big River at the dam");
        assert_eq!(list.items()[1].address.as_str(), "CE31A2C2");
        assert_eq!(list.items()[1].name, "");
    }

    #[test]
    fn test_load_names_by_stem() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lakes.nl");
        fs::write(&path, "1234ABCD:LAKE1\n").unwrap();
        let list = NetworkList::load(&path).unwrap();
        assert_eq!(list.name(), "lakes");
        assert_eq!(list.addresses().count(), 1);
    }
}
