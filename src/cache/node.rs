// src/cache/node.rs

//! Node, record and diff types of the data cache.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::cache::compare::payload_eq;
use crate::types::Payload;

/// A node stored in the cache arena.
///
/// `parent_id` and `children` are lookup keys into the same arena; the
/// cache keeps both directions consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheNode {
    pub unique_id: String,
    pub parent_id: Option<String>,
    pub payload: Payload,
    pub children: IndexSet<String>,
    pub is_leaf: bool,
    /// Remote field this node groups by, if it is a grouping node.
    pub field: Option<String>,
}

impl CacheNode {
    pub(crate) fn from_record(record: CacheRecord, parent_id: Option<String>) -> Self {
        Self {
            unique_id: record.unique_id,
            parent_id,
            payload: record.payload,
            children: IndexSet::new(),
            is_leaf: record.is_leaf,
            field: record.field,
        }
    }

    /// Whether `record` carries the same data as this node.
    pub(crate) fn matches(&self, record: &CacheRecord) -> bool {
        self.is_leaf == record.is_leaf
            && self.field == record.field
            && payload_eq(&self.payload, &record.payload)
    }

    pub fn item(&self) -> CacheItem {
        CacheItem {
            unique_id: self.unique_id.clone(),
            parent_id: self.parent_id.clone(),
            payload: self.payload.clone(),
            is_leaf: self.is_leaf,
            field: self.field.clone(),
        }
    }
}

/// Incoming snapshot of one child, as produced by a remote query.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub unique_id: String,
    pub payload: Payload,
    pub is_leaf: bool,
    pub field: Option<String>,
}

impl CacheRecord {
    pub fn new(unique_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            unique_id: unique_id.into(),
            payload,
            is_leaf: false,
            field: None,
        }
    }

    pub fn leaf(mut self) -> Self {
        self.is_leaf = true;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Owned view of a node, detached from the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    pub unique_id: String,
    pub parent_id: Option<String>,
    pub payload: Payload,
    pub is_leaf: bool,
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffMode {
    Added,
    Updated,
    Deleted,
}

/// One change produced by [`crate::cache::DataCache::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub mode: DiffMode,
    pub item: CacheItem,
}

impl DiffEntry {
    pub(crate) fn new(mode: DiffMode, item: CacheItem) -> Self {
        Self { mode, item }
    }

    pub fn unique_id(&self) -> &str {
        &self.item.unique_id
    }
}
