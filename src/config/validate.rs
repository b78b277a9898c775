// src/config/validate.rs

use crate::config::model::{CacheSection, ConfigFile, RawConfigFile};
use crate::errors::{Result, TaskfeedError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TaskfeedError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_cache_section(&raw.cache)?;
        Ok(ConfigFile::new_unchecked(raw.workers, raw.cache))
    }
}

fn validate_cache_section(cache: &CacheSection) -> Result<()> {
    if cache.grace_period_days < 1 {
        return Err(TaskfeedError::ConfigError(format!(
            "[cache].grace_period_days must be >= 1 (got {})",
            cache.grace_period_days
        )));
    }

    for (key, root) in [
        ("site_root", &cache.site_root),
        ("project_root", &cache.project_root),
    ] {
        if root.as_os_str().is_empty() {
            return Err(TaskfeedError::ConfigError(format!(
                "[cache].{key} must not be empty"
            )));
        }
    }

    Ok(())
}
