//! Watch command - report changes below a folder until interrupted.
//!
//! Installs a recursive listener on the folder, then runs a throttled bulk
//! refresh every interval so that changes made outside this process are
//! discovered and reported.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use fsproxy_core::{CancelFlag, EventKind, NodeEvent, ProxyConfig, RefreshOptions};

use super::mount_for;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Folder to watch
    pub root: PathBuf,

    /// Time between refresh passes
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub interval: Duration,
}

fn describe(event: &NodeEvent) -> String {
    let what = match &event.kind {
        EventKind::FolderCreated => "created folder".to_string(),
        EventKind::DataCreated => "created".to_string(),
        EventKind::Changed => "changed".to_string(),
        EventKind::Deleted => "deleted".to_string(),
        EventKind::Renamed { old_path } => format!("renamed from {}", old_path.display()),
        EventKind::Moved { old_path } => format!("moved from {}", old_path.display()),
    };
    format!("{what}: {}", event.path.display())
}

#[instrument(level = "info", name = "cmd::watch", skip_all, fields(root = %args.root.display()))]
pub fn execute(args: &Args, config: ProxyConfig) -> Result<()> {
    let (_registry, cache) = mount_for(&args.root, config)?;
    let root = cache.resolve_folder(&args.root)?;

    let listener = root.add_recursive_listener(Arc::new(|event: &NodeEvent| {
        println!("{}", describe(event));
    }))?;
    eprintln!(
        "Watching {} ({} folders), press Ctrl+C to stop",
        root.path().display(),
        root.watched_folders().len()
    );

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel()).context("Failed to set signal handler")?;

    let options = RefreshOptions::default()
        .under(root.path())
        .throttled(true)
        .cancel_with(cancel.clone());
    while !cancel.is_cancelled() {
        let started = Instant::now();
        let report = cache.bulk_refresh(&options);
        info!(visited = report.visited, errors = report.errors, "Refresh pass");

        let deadline = started + args.interval;
        while !cancel.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
    }

    root.remove_recursive_listener(listener);
    let stats = cache.metrics().snapshot();
    eprintln!(
        "Stopped: {} events, {} stats, hit rate {:.0}%",
        stats.events_fired,
        stats.stats,
        stats.hit_rate() * 100.0
    );
    Ok(())
}
