// src/retriever/locations.rs

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use blake3::Hasher;
use url::Url;

/// Folder holding downloaded assets below each cache root.
pub const ASSET_DIR: &str = "thumbs";
/// Folder holding persisted data caches below each cache root.
pub const TREE_DIR: &str = "trees";
/// Folder holding persisted schemas; never swept.
pub const SCHEMA_DIR: &str = "schema";

/// Folders below each cache root that the cleanup sweep may prune.
pub const CLEANUP_FOLDERS: [&str; 2] = [ASSET_DIR, TREE_DIR];

/// Which cache root an asset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetScope {
    Site,
    Project,
}

/// The two cache roots: one shared by the whole site and one per project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocations {
    pub site: PathBuf,
    pub project: PathBuf,
}

impl CacheLocations {
    pub fn new(site: impl Into<PathBuf>, project: impl Into<PathBuf>) -> Self {
        Self {
            site: site.into(),
            project: project.into(),
        }
    }

    pub fn root(&self, scope: AssetScope) -> &Path {
        match scope {
            AssetScope::Site => &self.site,
            AssetScope::Project => &self.project,
        }
    }

    /// Where the asset for `url` lives (or would live) under `scope`.
    ///
    /// Layout: `<root>/thumbs/<h0h1>/<h2h3>/<rest>[.<ext>]` where `h` is the
    /// hex BLAKE3 digest of the URL path.
    pub fn asset_path(&self, url: &str, scope: AssetScope) -> PathBuf {
        let (digest, ext) = asset_key(url);
        let mut name = digest[4..].to_string();
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(&ext);
        }
        self.root(scope)
            .join(ASSET_DIR)
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(name)
    }

    /// An existing local copy of `url`, looking in `scope` first and in the
    /// other root second.
    pub fn find_cached_asset(&self, url: &str, scope: AssetScope) -> Option<PathBuf> {
        let other = match scope {
            AssetScope::Site => AssetScope::Project,
            AssetScope::Project => AssetScope::Site,
        };
        [scope, other]
            .into_iter()
            .map(|scope| self.asset_path(url, scope))
            .find(|path| path.is_file())
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.project.join(SCHEMA_DIR)
    }

    /// Directories the cleanup sweep walks.
    pub fn cleanup_targets(&self) -> Vec<PathBuf> {
        let mut targets = Vec::new();
        for root in [&self.site, &self.project] {
            for folder in CLEANUP_FOLDERS {
                let target = root.join(folder);
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }
}

/// Hex digest of the URL path plus the path's extension, if any.
///
/// The query string is ignored so re-signed URLs share one local file.
pub fn asset_key(url: &str) -> (String, Option<String>) {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };

    let mut hasher = Hasher::new();
    hasher.update(path.as_bytes());
    let digest = hasher.finalize().to_hex().to_string();

    let ext = Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase);

    (digest, ext)
}

/// Mark `path` as recently used.
pub fn touch(path: &Path) -> Result<()> {
    let file = File::options()
        .write(true)
        .open(path)
        .with_context(|| format!("opening {path:?} to refresh its mtime"))?;
    file.set_modified(SystemTime::now())
        .with_context(|| format!("refreshing mtime of {path:?}"))?;
    Ok(())
}

/// Write `bytes` to `path` through a temporary sibling file.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
    }
    let tmp = path.with_extension("part");
    {
        let mut file = File::create(&tmp).with_context(|| format!("creating {tmp:?}"))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("moving download into {path:?}"))?;
    Ok(())
}
