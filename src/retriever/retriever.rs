// src/retriever/retriever.rs

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine::{TaskEvent, TaskManager};
use crate::errors::SchedulingError;
use crate::retriever::locations::{AssetScope, CacheLocations, touch, write_atomically};
use crate::retriever::remote::{Query, RemoteSource};
use crate::retriever::{ASSET_CHECK_PRIORITY, ASSET_DOWNLOAD_PRIORITY, QUERY_PRIORITY};
use crate::scheduler::{TaskBody, TaskOptions};
use crate::types::{GroupId, Payload, TaskId, TaskState};

/// Where an asset handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOrigin {
    /// A local copy already existed.
    Cache,
    /// The asset was fetched from the remote source.
    Download,
}

/// Results of retriever requests, keyed by the id returned at submission.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrieverEvent {
    QueryCompleted {
        request: TaskId,
        records: Vec<Payload>,
    },
    AssetReady {
        request: TaskId,
        url: String,
        path: PathBuf,
        origin: AssetOrigin,
    },
    Failed {
        request: TaskId,
        message: String,
    },
}

#[derive(Debug, Clone)]
enum Request {
    Query,
    AssetCheck { url: String, download: TaskId },
    AssetDownload { url: String, check: TaskId },
}

/// Remote queries and cached asset downloads on top of a [`TaskManager`].
///
/// All work is submitted into a group owned by the retriever, so
/// [`DataRetriever::clear`] drops everything it queued without touching
/// other users of the same manager.
pub struct DataRetriever {
    manager: TaskManager,
    source: Arc<dyn RemoteSource>,
    locations: CacheLocations,
    group: GroupId,
    requests: HashMap<TaskId, Request>,
}

impl DataRetriever {
    pub fn new(manager: TaskManager, source: Arc<dyn RemoteSource>, locations: CacheLocations) -> Self {
        let group = manager.next_group_id();
        Self {
            manager,
            source,
            locations,
            group,
            requests: HashMap::new(),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn locations(&self) -> &CacheLocations {
        &self.locations
    }

    /// Number of requests still waiting for an event.
    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    /// Run `query` against the remote source in the background.
    pub fn execute_query(&mut self, query: Query) -> Result<TaskId, SchedulingError> {
        let source = Arc::clone(&self.source);
        let body = TaskBody::run(move || {
            let records = source.query(&query)?;
            Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
        });

        let id = self.manager.add_task(body, self.options(QUERY_PRIORITY))?;
        self.requests.insert(id, Request::Query);
        debug!(request = id, "query submitted");
        Ok(id)
    }

    /// Make a local copy of the asset at `url` available.
    ///
    /// Submits a high-priority check for an existing copy and a low-priority
    /// download that only fetches if the check found nothing. Both report
    /// under the returned id.
    pub fn request_asset(&mut self, url: &str, scope: AssetScope) -> Result<TaskId, SchedulingError> {
        let check_body = {
            let locations = self.locations.clone();
            let url = url.to_string();
            TaskBody::run(move || {
                let path = locations.find_cached_asset(&url, scope);
                if let Some(path) = &path {
                    if let Err(err) = touch(path) {
                        warn!(path = ?path, error = %err, "could not refresh cached asset");
                    }
                }
                let path = path.map(|path| path.to_string_lossy().into_owned());
                Ok(json!({ "cached_path": path }))
            })
        };
        let check = self
            .manager
            .add_task(check_body, self.options(ASSET_CHECK_PRIORITY))?;

        let download_body = {
            let locations = self.locations.clone();
            let source = Arc::clone(&self.source);
            let url = url.to_string();
            TaskBody::chained(move |upstream| {
                if let Some(Value::String(path)) = upstream.merged().get("cached_path") {
                    return Ok(json!({ "skipped": true, "path": path }));
                }
                let path = download_asset(source.as_ref(), &locations, &url, scope)?;
                Ok(json!({ "skipped": false, "path": path.to_string_lossy() }))
            })
        };
        let download = self
            .manager
            .add_task(download_body, self.options(ASSET_DOWNLOAD_PRIORITY).after(check))?;

        self.requests.insert(
            check,
            Request::AssetCheck {
                url: url.to_string(),
                download,
            },
        );
        self.requests.insert(
            download,
            Request::AssetDownload {
                url: url.to_string(),
                check,
            },
        );
        debug!(request = check, download, url, "asset requested");
        Ok(check)
    }

    /// Translate a task event into a retriever event.
    ///
    /// Must be called on the control context with every event received from
    /// the manager's dispatcher; events of other groups return `None`.
    pub fn handle_event(&mut self, event: &TaskEvent) -> Option<RetrieverEvent> {
        if event.group() != Some(self.group) {
            return None;
        }

        match event {
            TaskEvent::Completed { id, result, .. } => self.completed(*id, result),
            TaskEvent::Failed { id, error, .. } => {
                let request = match self.requests.remove(id)? {
                    Request::Query => *id,
                    Request::AssetCheck { download, .. } => {
                        self.requests.remove(&download);
                        *id
                    }
                    Request::AssetDownload { check, .. } => {
                        self.requests.remove(&check);
                        check
                    }
                };
                Some(RetrieverEvent::Failed {
                    request,
                    message: error.message.clone(),
                })
            }
            TaskEvent::Cancelled { id, .. } => {
                if let Some(Request::AssetDownload { check, .. }) = self.requests.remove(id) {
                    self.requests.remove(&check);
                }
                None
            }
            TaskEvent::GroupFinished { .. } => {
                self.prune();
                None
            }
        }
    }

    fn completed(&mut self, id: TaskId, result: &Value) -> Option<RetrieverEvent> {
        match self.requests.get(&id)?.clone() {
            Request::Query => {
                self.requests.remove(&id);
                Some(RetrieverEvent::QueryCompleted {
                    request: id,
                    records: records_from(result),
                })
            }
            Request::AssetCheck { url, download } => {
                // Without a local copy the check entry stays until the
                // download finishes, so the request can still be stopped.
                let path = result.get("cached_path")?.as_str()?;
                self.requests.remove(&id);
                self.requests.remove(&download);
                Some(RetrieverEvent::AssetReady {
                    request: id,
                    url,
                    path: PathBuf::from(path),
                    origin: AssetOrigin::Cache,
                })
            }
            Request::AssetDownload { url, check } => {
                self.requests.remove(&id);
                self.requests.remove(&check);
                if result.get("skipped").and_then(Value::as_bool).unwrap_or(false) {
                    return None;
                }
                let path = result.get("path")?.as_str()?;
                Some(RetrieverEvent::AssetReady {
                    request: check,
                    url,
                    path: PathBuf::from(path),
                    origin: AssetOrigin::Download,
                })
            }
        }
    }

    /// Cancel one request. Both halves of an asset request are cancelled,
    /// whichever id is given; no event is reported for it afterwards.
    pub fn stop_work(&mut self, request: TaskId) {
        let Some(entry) = self.requests.remove(&request) else {
            return;
        };
        let partner = match entry {
            Request::Query => None,
            Request::AssetCheck { download, .. } => Some(download),
            Request::AssetDownload { check, .. } => Some(check),
        };

        self.manager.cancel_task(request);
        if let Some(partner) = partner {
            self.requests.remove(&partner);
            self.manager.cancel_task(partner);
        }
        debug!(request, "retriever request stopped");
    }

    /// Forget requests whose tasks were cancelled behind the retriever's
    /// back, e.g. by another holder of the manager cancelling the group.
    /// Returns how many were dropped.
    ///
    /// Runs on every `GroupFinished` of the retriever's group. Requests lost
    /// to a hard stop are not pruned; call [`DataRetriever::clear`] instead.
    pub fn prune(&mut self) -> usize {
        let before = self.requests.len();
        let manager = &self.manager;
        self.requests.retain(|id, _| {
            !matches!(manager.state_of(*id), None | Some(TaskState::Cancelled))
        });
        let pruned = before - self.requests.len();
        if pruned > 0 {
            debug!(group = self.group, pruned, "pruned cancelled retriever requests");
        }
        pruned
    }

    /// Cancel everything this retriever queued.
    pub fn clear(&mut self) {
        let cancelled = self.manager.cancel(self.group);
        debug!(group = self.group, cancelled = cancelled.len(), "retriever cleared");
        self.requests.clear();
    }

    fn options(&self, priority: i32) -> TaskOptions {
        TaskOptions::new().priority(priority).in_group(self.group)
    }
}

/// Download `url` into the asset cache and return the local path.
///
/// If the fetch or the write fails but a local copy exists, that copy is
/// used instead and its mtime refreshed.
pub fn download_asset(
    source: &dyn RemoteSource,
    locations: &CacheLocations,
    url: &str,
    scope: AssetScope,
) -> Result<PathBuf> {
    let target = locations.asset_path(url, scope);
    let fetched = source
        .fetch(url)
        .and_then(|bytes| write_atomically(&target, &bytes));

    match fetched {
        Ok(()) => {
            debug!(url, path = ?target, "asset downloaded");
            Ok(target)
        }
        Err(err) => match locations.find_cached_asset(url, scope) {
            Some(existing) => {
                warn!(url, error = %err, "download failed; using cached copy");
                if let Err(touch_err) = touch(&existing) {
                    warn!(path = ?existing, error = %touch_err, "could not refresh cached asset");
                }
                Ok(existing)
            }
            None => Err(err.context(format!("downloading {url}"))),
        },
    }
}

fn records_from(result: &Value) -> Vec<Payload> {
    match result {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}
