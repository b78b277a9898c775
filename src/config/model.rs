// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::ManagerOptions;
use crate::retriever::{CacheLocations, DEFAULT_GRACE_PERIOD_DAYS};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [workers]
/// count = 4
/// start_processing = true
///
/// [cache]
/// site_root = "/var/cache/taskfeed/site"
/// project_root = "/var/cache/taskfeed/project"
/// grace_period_days = 60
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub workers: WorkerSection,

    #[serde(default)]
    pub cache: CacheSection,
}

/// `[workers]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Size of the worker pool; `0` uses the available parallelism.
    #[serde(default)]
    pub count: usize,

    /// Whether workers start claiming tasks immediately.
    #[serde(default = "default_start_processing")]
    pub start_processing: bool,
}

fn default_start_processing() -> bool {
    true
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            count: 0,
            start_processing: default_start_processing(),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_site_root")]
    pub site_root: PathBuf,

    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Files unused for longer than this many days are swept.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
}

fn default_site_root() -> PathBuf {
    PathBuf::from(".taskfeed/site")
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".taskfeed/project")
}

fn default_grace_period_days() -> i64 {
    DEFAULT_GRACE_PERIOD_DAYS
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            site_root: default_site_root(),
            project_root: default_project_root(),
            grace_period_days: default_grace_period_days(),
        }
    }
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub workers: WorkerSection,
    pub cache: CacheSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(workers: WorkerSection, cache: CacheSection) -> Self {
        Self { workers, cache }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            workers: self.workers.count,
            start_processing: self.workers.start_processing,
        }
    }

    pub fn cache_locations(&self) -> CacheLocations {
        CacheLocations::new(&self.cache.site_root, &self.cache.project_root)
    }
}
