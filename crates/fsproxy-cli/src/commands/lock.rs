//! Lock command - hold a file lock until interrupted.
//!
//! Without `--hold` the lock is held until a termination signal; the
//! shutdown hook then releases it (removing any sentinel) and exits with
//! status 130.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use fsproxy_core::{ProxyConfig, install_shutdown_hook};

use super::mount_for;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// File to lock
    pub path: PathBuf,

    /// Release after this long instead of waiting for a signal
    #[arg(long, value_parser = humantime::parse_duration)]
    pub hold: Option<Duration>,
}

#[instrument(level = "info", name = "cmd::lock", skip_all, fields(path = %args.path.display()))]
pub fn execute(args: &Args, config: ProxyConfig) -> Result<()> {
    let (registry, cache) = mount_for(&args.path, config)?;
    let node = cache.resolve_file(&args.path)?;
    let lock = node.lock()?;
    let _hook = install_shutdown_hook(registry.locks()).context("Failed to install signal handlers")?;

    eprintln!("Locked {}", lock.path().display());
    if let Some(sentinel) = lock.sentinel_path() {
        eprintln!("Escalated, sentinel at {}", sentinel.display());
    }

    let Some(hold) = args.hold else {
        eprintln!("Press Ctrl+C to release");
        // The shutdown hook releases every lock and exits the process.
        loop {
            thread::park();
        }
    };
    thread::sleep(hold);
    lock.release();
    eprintln!("Released");
    Ok(())
}
