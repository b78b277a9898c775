// src/cache/data_cache.rs

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::cache::node::{CacheItem, CacheNode, CacheRecord, DiffEntry, DiffMode};
use crate::errors::CacheError;

/// Node arena plus the ordered ids of the root's children.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CacheTree {
    pub(crate) nodes: HashMap<String, CacheNode>,
    pub(crate) root_children: IndexSet<String>,
}

impl CacheTree {
    fn children_of(&self, parent_id: Option<&str>) -> Result<&IndexSet<String>, CacheError> {
        match parent_id {
            None => Ok(&self.root_children),
            Some(parent) => self
                .nodes
                .get(parent)
                .map(|node| &node.children)
                .ok_or_else(|| CacheError::UnknownParent(parent.to_string())),
        }
    }

    fn set_children(&mut self, parent_id: Option<&str>, children: IndexSet<String>) {
        match parent_id {
            None => self.root_children = children,
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children = children;
                }
            }
        }
    }

    /// `parent_id` and all of its ancestors.
    fn lineage(&self, parent_id: Option<&str>) -> HashSet<String> {
        let mut lineage = HashSet::new();
        let mut current = parent_id.map(str::to_string);
        while let Some(id) = current {
            current = self.nodes.get(&id).and_then(|node| node.parent_id.clone());
            if !lineage.insert(id) {
                break;
            }
        }
        lineage
    }

    /// Remove `unique_id` and everything below it, detaching it from its
    /// parent. Returns a snapshot of the removed node.
    fn remove_subtree(&mut self, unique_id: &str) -> Option<CacheItem> {
        let node = self.nodes.remove(unique_id)?;

        match node.parent_id.as_deref() {
            None => {
                self.root_children.shift_remove(unique_id);
            }
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    parent.children.shift_remove(unique_id);
                }
            }
        }

        let mut stack: Vec<String> = node.children.iter().cloned().collect();
        while let Some(id) = stack.pop() {
            if let Some(child) = self.nodes.remove(&id) {
                stack.extend(child.children);
            }
        }

        Some(node.item())
    }

    fn update<I>(&mut self, parent_id: Option<&str>, records: I) -> Result<Vec<DiffEntry>, CacheError>
    where
        I: IntoIterator<Item = CacheRecord>,
    {
        let old_children = self.children_of(parent_id)?.clone();
        let lineage = self.lineage(parent_id);

        // Later duplicates win but keep the position of the first one.
        let mut incoming: IndexMap<String, CacheRecord> = IndexMap::new();
        for record in records {
            if lineage.contains(&record.unique_id) {
                warn!(
                    id = %record.unique_id,
                    parent = ?parent_id,
                    "record would become its own descendant; skipping"
                );
                continue;
            }
            incoming.insert(record.unique_id.clone(), record);
        }

        let mut diff = Vec::new();
        let mut new_children = IndexSet::with_capacity(incoming.len());

        for (unique_id, record) in incoming {
            if old_children.contains(&unique_id) {
                if let Some(node) = self.nodes.get_mut(&unique_id) {
                    if !node.matches(&record) {
                        node.payload = record.payload;
                        node.is_leaf = record.is_leaf;
                        node.field = record.field;
                        diff.push(DiffEntry::new(DiffMode::Updated, node.item()));
                    }
                    new_children.insert(unique_id);
                    continue;
                }
            } else if self.nodes.contains_key(&unique_id) {
                debug!(id = %unique_id, parent = ?parent_id, "node moved to a new parent");
                if let Some(removed) = self.remove_subtree(&unique_id) {
                    diff.push(DiffEntry::new(DiffMode::Deleted, removed));
                }
            }

            let node = CacheNode::from_record(record, parent_id.map(str::to_string));
            diff.push(DiffEntry::new(DiffMode::Added, node.item()));
            self.nodes.insert(unique_id.clone(), node);
            new_children.insert(unique_id);
        }

        for unique_id in old_children.iter() {
            if new_children.contains(unique_id) {
                continue;
            }
            if let Some(removed) = self.remove_subtree(unique_id) {
                diff.push(DiffEntry::new(DiffMode::Deleted, removed));
            }
        }

        self.set_children(parent_id, new_children);
        Ok(diff)
    }
}

/// Disk-persisted, diffable tree of remote records.
///
/// A cache starts unloaded; [`DataCache::load_cache`] either restores the
/// file at `path` or starts from an empty tree. Mutations happen on the
/// control context only, so there is no internal locking.
#[derive(Debug)]
pub struct DataCache {
    pub(crate) path: PathBuf,
    pub(crate) tree: Option<CacheTree>,
}

impl DataCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tree: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_cache_loaded(&self) -> bool {
        self.tree.is_some()
    }

    /// Whether a cache file exists on disk.
    pub fn is_cache_available(&self) -> bool {
        self.path.is_file()
    }

    /// Drop the in-memory tree. The file on disk is left untouched.
    pub fn unload_cache(&mut self) {
        if self.tree.take().is_some() {
            debug!(path = ?self.path, "cache unloaded");
        }
    }

    /// Reconcile the children of `parent_id` (`None` for the root) with
    /// `records` and return what changed.
    ///
    /// Entries are ordered: added and updated nodes in record order, then
    /// deleted nodes in their previous order. Deleting a node drops its whole
    /// subtree. Feeding the same records twice yields an empty diff.
    pub fn update<I>(&mut self, parent_id: Option<&str>, records: I) -> Result<Vec<DiffEntry>, CacheError>
    where
        I: IntoIterator<Item = CacheRecord>,
    {
        let tree = self.tree.as_mut().ok_or(CacheError::NotLoaded)?;
        let diff = tree.update(parent_id, records)?;
        debug!(parent = ?parent_id, changes = diff.len(), "cache updated");
        Ok(diff)
    }

    /// Call `callback` once for each existing child of `parent_id` and return
    /// how many there were. Unknown parents and an unloaded cache yield 0.
    pub fn generate_child_nodes<C, F>(&self, parent_id: Option<&str>, context: &mut C, mut callback: F) -> usize
    where
        F: FnMut(&mut C, &CacheNode),
    {
        let Some(tree) = self.tree.as_ref() else {
            return 0;
        };
        let Ok(children) = tree.children_of(parent_id) else {
            debug!(parent = ?parent_id, "no such parent in cache");
            return 0;
        };

        let mut count = 0;
        for child in children.iter().filter_map(|id| tree.nodes.get(id)) {
            callback(context, child);
            count += 1;
        }
        count
    }

    pub fn node(&self, unique_id: &str) -> Option<&CacheNode> {
        self.tree.as_ref()?.nodes.get(unique_id)
    }

    pub fn item(&self, unique_id: &str) -> Option<CacheItem> {
        self.node(unique_id).map(CacheNode::item)
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.node(unique_id).is_some()
    }

    /// Ids of the children of `parent_id`, in order.
    pub fn child_ids(&self, parent_id: Option<&str>) -> Vec<String> {
        self.tree
            .as_ref()
            .and_then(|tree| tree.children_of(parent_id).ok())
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every id in the cache, in no particular order.
    pub fn uids(&self) -> Vec<String> {
        self.tree
            .as_ref()
            .map(|tree| tree.nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tree.as_ref().map_or(0, |tree| tree.nodes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
