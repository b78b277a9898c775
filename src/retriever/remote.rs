// src/retriever/remote.rs

//! Contract with the remote data source.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Payload;

/// An opaque request understood by a [`RemoteSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub method: String,
    pub params: Value,
}

impl Query {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Remote data source. Only ever called from inside task bodies, on the
/// blocking pool, so implementations may block.
pub trait RemoteSource: Send + Sync + 'static {
    fn query(&self, query: &Query) -> Result<Vec<Payload>>;

    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
