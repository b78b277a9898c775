// src/cache/persist.rs

//! On-disk format of the data cache.
//!
//! The file is a CBOR document holding a generation number, the ordered
//! root children and every node. Writes go to a sibling temporary file that
//! is renamed over the target.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::data_cache::{CacheTree, DataCache};
use crate::cache::node::CacheNode;
use crate::errors::CacheError;

/// Format version of cache files. Files with any other generation are
/// discarded on load.
pub const CACHE_GENERATION: u32 = 1;

#[derive(Serialize)]
struct CacheFileRef<'a> {
    generation: u32,
    root_children: &'a IndexSet<String>,
    nodes: Vec<&'a CacheNode>,
}

#[derive(Deserialize)]
struct CacheFile {
    generation: u32,
    root_children: IndexSet<String>,
    nodes: Vec<CacheNode>,
}

#[derive(Deserialize)]
struct CacheFileHeader {
    generation: u32,
}

/// Result of [`DataCache::load_cache`].
#[derive(Debug)]
pub enum LoadOutcome {
    /// No file on disk; the cache starts empty.
    Empty,
    /// The file was restored with this many nodes.
    Loaded(usize),
    /// The file was unusable and the cache starts empty.
    Discarded(CacheError),
}

impl DataCache {
    /// Load the cache file, replacing whatever is in memory.
    ///
    /// Never fails: a missing, corrupt, inconsistent or outdated file leaves
    /// an empty, loaded cache behind.
    pub fn load_cache(&mut self) -> LoadOutcome {
        self.tree = Some(CacheTree::default());

        if !self.path.exists() {
            debug!(path = ?self.path, "no cache file; starting empty");
            return LoadOutcome::Empty;
        }

        match read_cache_file(&self.path) {
            Ok(tree) => {
                let count = tree.nodes.len();
                self.tree = Some(tree);
                info!(path = ?self.path, nodes = count, "cache loaded");
                LoadOutcome::Loaded(count)
            }
            Err(err) => {
                debug!(path = ?self.path, error = %err, "discarding unusable cache file");
                LoadOutcome::Discarded(err)
            }
        }
    }

    /// Write the loaded tree to disk, creating parent directories as needed.
    pub fn save_cache(&self) -> Result<(), CacheError> {
        let tree = self.tree.as_ref().ok_or(CacheError::NotLoaded)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let file = CacheFileRef {
            generation: CACHE_GENERATION,
            root_children: &tree.root_children,
            nodes: tree.nodes.values().collect(),
        };

        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            ciborium::into_writer(&file, &mut writer)
                .map_err(|err| CacheError::Encode(err.to_string()))?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, nodes = tree.nodes.len(), "cache saved");
        Ok(())
    }

    /// Delete the cache file, then reload so the cache is empty but loaded.
    ///
    /// Returns `false` if the file exists but could not be removed.
    pub fn remove_cache(&mut self) -> bool {
        let removed = match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = ?self.path, error = %err, "failed to remove cache file");
                false
            }
        };

        self.unload_cache();
        self.load_cache();
        removed
    }
}

fn read_cache_file(path: &Path) -> Result<CacheTree, CacheError> {
    let bytes = fs::read(path)?;

    let header: CacheFileHeader = ciborium::from_reader(bytes.as_slice())
        .map_err(|err| CacheError::Corrupt(err.to_string()))?;
    if header.generation != CACHE_GENERATION {
        return Err(CacheError::GenerationMismatch {
            found: header.generation,
            expected: CACHE_GENERATION,
        });
    }

    let file: CacheFile = ciborium::from_reader(bytes.as_slice())
        .map_err(|err| CacheError::Corrupt(err.to_string()))?;

    let mut nodes = HashMap::with_capacity(file.nodes.len());
    for node in file.nodes {
        if let Some(dup) = nodes.insert(node.unique_id.clone(), node) {
            return Err(CacheError::Corrupt(format!("duplicate node '{}'", dup.unique_id)));
        }
    }

    let tree = CacheTree {
        nodes,
        root_children: file.root_children,
    };
    check_consistency(&tree)?;
    Ok(tree)
}

/// Every child link must point back to its parent and every node must be
/// reachable from the root.
fn check_consistency(tree: &CacheTree) -> Result<(), CacheError> {
    let corrupt = |msg: String| Err(CacheError::Corrupt(msg));

    let mut reached: HashSet<&str> = HashSet::with_capacity(tree.nodes.len());
    let mut stack: Vec<(Option<&str>, &str)> = tree
        .root_children
        .iter()
        .map(|id| (None, id.as_str()))
        .collect();

    while let Some((parent, id)) = stack.pop() {
        let Some(node) = tree.nodes.get(id) else {
            return corrupt(format!("child '{id}' has no node"));
        };
        if node.parent_id.as_deref() != parent {
            return corrupt(format!("node '{id}' does not point back to its parent"));
        }
        if !reached.insert(id) {
            return corrupt(format!("node '{id}' is linked twice"));
        }
        stack.extend(node.children.iter().map(|child| (Some(id), child.as_str())));
    }

    if reached.len() != tree.nodes.len() {
        return corrupt(format!(
            "{} node(s) unreachable from the root",
            tree.nodes.len() - reached.len()
        ));
    }
    Ok(())
}
