#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use taskfeed::retriever::{Query, RemoteSource};
use taskfeed::types::Payload;

/// In-memory [`RemoteSource`] with canned answers and call counters.
#[derive(Default)]
pub struct FakeRemoteSource {
    queries: Mutex<HashMap<String, Vec<Payload>>>,
    assets: Mutex<HashMap<String, Vec<u8>>>,
    failing_fetches: AtomicBool,
    query_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeRemoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries with `method` with `records`.
    pub fn with_query_result(self, method: &str, records: Vec<Payload>) -> Self {
        self.queries
            .lock()
            .unwrap()
            .insert(method.to_string(), records);
        self
    }

    pub fn with_asset(self, url: &str, bytes: &[u8]) -> Self {
        self.assets
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.to_vec());
        self
    }

    /// Make every `fetch` fail.
    pub fn fail_fetches(&self, fail: bool) {
        self.failing_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl RemoteSource for FakeRemoteSource {
    fn query(&self, query: &Query) -> Result<Vec<Payload>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap()
            .get(&query.method)
            .cloned()
            .ok_or_else(|| anyhow!("no canned result for {}", query.method))
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_fetches.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused while fetching {url}"));
        }
        self.assets
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {url}"))
    }
}
