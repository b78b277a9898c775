// src/cache/hierarchy.rs

//! Building a grouped tree out of a flat list of records.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::cache::data_cache::DataCache;
use crate::cache::node::{CacheRecord, DiffEntry};
use crate::errors::CacheError;
use crate::types::Payload;

/// Key of a grouping node for `value` below `parent`.
///
/// Root-level groups are keyed `/value`, nested ones `parent/value`.
pub fn hierarchy_key(parent: Option<&str>, value: &Value) -> String {
    let part = value_key(value);
    match parent {
        None => format!("/{part}"),
        Some(parent) => format!("{parent}/{part}"),
    }
}

/// Stable textual form of a field value.
///
/// Linked entities (objects with an `id`) collapse to their id, lists are
/// comma-joined and empty lists and nulls become `_`.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Null => "_".to_string(),
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("id") {
            Some(id) => value_key(id),
            None => value.to_string(),
        },
        Value::Array(items) if items.is_empty() => "_".to_string(),
        Value::Array(items) => items.iter().map(value_key).collect::<Vec<_>>().join(","),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

impl DataCache {
    /// Rebuild the tree from a flat record list grouped by `hierarchy`.
    ///
    /// Every field but the last becomes a level of grouping nodes; records
    /// become leaves keyed by their `id`, grouped below the last of them.
    /// Records without an `id` are skipped. The tree is reconciled level by
    /// level, so unchanged nodes produce no diff and vanished groups are
    /// deleted with their whole subtree.
    pub fn update_hierarchy(
        &mut self,
        records: &[Payload],
        hierarchy: &[&str],
    ) -> Result<Vec<DiffEntry>, CacheError> {
        if !self.is_cache_loaded() {
            return Err(CacheError::NotLoaded);
        }

        let (group_fields, leaf_field) = match hierarchy.split_last() {
            Some((leaf, groups)) => (groups, Some(*leaf)),
            None => (&[][..], None),
        };

        let mut levels: IndexMap<Option<String>, IndexMap<String, CacheRecord>> = IndexMap::new();
        levels.entry(None).or_default();

        for record in records {
            let Some(id) = record.get("id") else {
                warn!("record without an id in hierarchy update; skipping");
                continue;
            };

            let mut parent: Option<String> = None;
            for field in group_fields {
                let value = record.get(*field).cloned().unwrap_or(Value::Null);
                let unique_id = hierarchy_key(parent.as_deref(), &value);

                levels
                    .entry(parent.clone())
                    .or_default()
                    .entry(unique_id.clone())
                    .or_insert_with(|| {
                        let mut payload = Payload::new();
                        payload.insert((*field).to_string(), value);
                        CacheRecord::new(unique_id.clone(), payload).with_field(*field)
                    });

                parent = Some(unique_id);
            }

            let mut leaf = CacheRecord::new(value_key(id), record.clone()).leaf();
            if let Some(field) = leaf_field {
                leaf = leaf.with_field(field);
            }
            levels
                .entry(parent)
                .or_default()
                .insert(leaf.unique_id.clone(), leaf);
        }

        // A level is always inserted after the level holding its parent.
        let mut diff = Vec::new();
        for (parent, children) in levels {
            diff.extend(self.update(parent.as_deref(), children.into_values())?);
        }
        Ok(diff)
    }
}
