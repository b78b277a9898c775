// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod retriever;
pub mod scheduler;
pub mod schema;
pub mod types;

use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::Result;
use tracing::{debug, info};

use crate::cache::{CacheNode, DataCache, LoadOutcome};
use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, default_config_path, load_or_default};
use crate::retriever::CleanupHandle;

pub use crate::cache::{CacheRecord, DiffEntry, DiffMode};
pub use crate::engine::{ResultDispatcher, TaskEvent, TaskManager};
pub use crate::retriever::{DataRetriever, remove_old_cached_data};
pub use crate::scheduler::{TaskBody, TaskOptions, TaskScheduler};

/// High-level entry point used by `main.rs`.
///
/// Loads the config (falling back to defaults when the file is missing) and
/// runs the requested maintenance command.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_or_default(&config_path)?;
    debug!(path = ?config_path, "configuration loaded");

    match args.command {
        Command::Sweep { grace_days } => sweep(&cfg, grace_days).await,
        Command::Inspect { path } => {
            inspect(&path);
            Ok(())
        }
        Command::Config => {
            print_config(&cfg);
            Ok(())
        }
    }
}

/// Sweep the configured cache roots. Ctrl-C stops the sweep early.
async fn sweep(cfg: &ConfigFile, grace_days: Option<i64>) -> Result<()> {
    let grace = grace_days.unwrap_or(cfg.cache.grace_period_days);
    let targets = cfg.cache_locations().cleanup_targets();
    info!(grace_days = grace, ?targets, "starting cache sweep");

    let handle = CleanupHandle::spawn(grace, targets)?;
    {
        let stop = handle.stop_flag();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            stop.store(true, Ordering::Relaxed);
        });
    }

    let report = handle.join().await?;
    println!(
        "removed {} file(s) and {} folder(s), {} error(s){}",
        report.files_removed,
        report.dirs_removed,
        report.errors,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

/// Print the tree stored in a data cache file.
fn inspect(path: &Path) {
    let mut cache = DataCache::new(path);
    match cache.load_cache() {
        LoadOutcome::Loaded(count) => println!("{}: {count} node(s)", path.display()),
        LoadOutcome::Empty => {
            println!("{}: no cache file", path.display());
            return;
        }
        LoadOutcome::Discarded(err) => {
            println!("{}: unusable cache file ({err})", path.display());
            return;
        }
    }
    print_children(&cache, None, 1);
}

fn print_children(cache: &DataCache, parent: Option<&str>, depth: usize) {
    let mut children: Vec<(String, bool)> = Vec::new();
    cache.generate_child_nodes(parent, &mut children, |acc, node: &CacheNode| {
        acc.push((node.unique_id.clone(), node.is_leaf));
    });

    for (id, is_leaf) in children {
        let marker = if is_leaf { "-" } else { "+" };
        println!("{:indent$}{marker} {id}", "", indent = depth * 2);
        if !is_leaf {
            print_children(cache, Some(&id), depth + 1);
        }
    }
}

fn print_config(cfg: &ConfigFile) {
    println!("taskfeed configuration");
    println!("  workers.count = {}", cfg.workers.count);
    println!(
        "  workers.resolved = {}",
        cfg.manager_options().resolved_workers()
    );
    println!("  workers.start_processing = {}", cfg.workers.start_processing);
    println!("  cache.site_root = {}", cfg.cache.site_root.display());
    println!("  cache.project_root = {}", cfg.cache.project_root.display());
    println!("  cache.grace_period_days = {}", cfg.cache.grace_period_days);
    println!();
    println!("sweep targets:");
    for target in cfg.cache_locations().cleanup_targets() {
        println!("  - {}", target.display());
    }
}
