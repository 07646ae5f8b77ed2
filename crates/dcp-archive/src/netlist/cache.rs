//! Directory-backed network list cache.
//!
//! The cache owns a directory of `*.nl` files and publishes an immutable
//! [`NetlistSnapshot`]. [`NetlistCache::refresh`] reloads every file when any
//! file's modification time is newer than the last load, or when files were
//! added or removed. Readers holding an older snapshot are unaffected.

use crate::error::Result;
use crate::message::DcpAddress;
use crate::netlist::list::{NetworkList, NETLIST_EXTENSION};
use crate::netlist::resolver::NameResolver;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;
use tracing::{info, warn};

/// Looks up network lists by name.
pub trait NetlistSource {
    /// Returns the named list, if known.
    fn network_list(&self, name: &str) -> Option<Arc<NetworkList>>;
}

/// Immutable set of loaded network lists and the names they define.
#[derive(Debug, Clone, Default)]
pub struct NetlistSnapshot {
    lists: HashMap<String, Arc<NetworkList>>,
    names: HashMap<String, DcpAddress>,
}

impl NetlistSnapshot {
    /// Builds a snapshot from lists. Later lists win on name collisions.
    pub fn from_lists(lists: Vec<NetworkList>) -> Self {
        let mut snapshot = Self::default();
        for list in lists {
            for item in list.items() {
                if !item.name.is_empty() {
                    snapshot
                        .names
                        .insert(item.name.to_lowercase(), item.address.clone());
                }
            }
            snapshot
                .lists
                .insert(list.name().to_lowercase(), Arc::new(list));
        }
        snapshot
    }

    /// Number of lists.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// True if no lists are loaded.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

impl NetlistSource for NetlistSnapshot {
    fn network_list(&self, name: &str) -> Option<Arc<NetworkList>> {
        let base = Path::new(name)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        let base = base
            .strip_suffix(&format!(".{NETLIST_EXTENSION}"))
            .unwrap_or(base);
        self.lists.get(&base.to_lowercase()).cloned()
    }
}

impl NameResolver for NetlistSnapshot {
    fn resolve(&self, name: &str) -> Option<DcpAddress> {
        self.names.get(&name.to_lowercase()).cloned()
    }
}

#[derive(Debug, Default)]
struct LoadState {
    newest_mtime: Option<SystemTime>,
    files: BTreeSet<PathBuf>,
}

/// Owns a network list directory and its current snapshot.
#[derive(Debug)]
pub struct NetlistCache {
    dir: PathBuf,
    snapshot: RwLock<Arc<NetlistSnapshot>>,
    state: Mutex<LoadState>,
}

impl NetlistCache {
    /// Creates a cache over `dir` without loading it.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            snapshot: RwLock::new(Arc::new(NetlistSnapshot::default())),
            state: Mutex::new(LoadState::default()),
        }
    }

    /// Creates a cache and performs the initial load.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let cache = Self::new(dir);
        cache.refresh()?;
        Ok(cache)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<NetlistSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Reloads if the directory changed since the last load.
    ///
    /// Returns true if a new snapshot was published.
    pub fn refresh(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

        let mut files = BTreeSet::new();
        let mut newest: Option<SystemTime> = None;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(NETLIST_EXTENSION) {
                continue;
            }
            let mtime = fs::metadata(&path)?.modified()?;
            newest = Some(newest.map_or(mtime, |n| n.max(mtime)));
            files.insert(path);
        }

        let changed = state.newest_mtime.is_none()
            || files != state.files
            || newest > state.newest_mtime;
        if !changed {
            return Ok(false);
        }

        let mut lists = Vec::with_capacity(files.len());
        for path in &files {
            match NetworkList::load(path) {
                Ok(list) => lists.push(list),
                Err(err) => warn!("Skipping network list {}: {:?}", path.display(), err),
            }
        }

        let snapshot = Arc::new(NetlistSnapshot::from_lists(lists));
        info!(
            "Loaded {} network lists from {}",
            snapshot.len(),
            self.dir.display()
        );
        *self.snapshot.write().unwrap_or_else(|err| err.into_inner()) = snapshot;

        state.files = files;
        state.newest_mtime = Some(newest.unwrap_or(SystemTime::UNIX_EPOCH));
        Ok(true)
    }
}
