#![deny(unsafe_code)]

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fsproxy_core::{FsError, ProxyConfig};

use crate::commands::{lock, stat, tree, watch};

/// Inspect and exercise the fsproxy cache layer
#[derive(Parser)]
#[command(name = "fsproxy")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Print the proxy tree of a folder
    fsproxy tree ~/projects/site

    # Report changes below a folder until Ctrl+C
    fsproxy watch ~/projects/site --interval 2s

    # Hold a lock on a file until Ctrl+C
    fsproxy lock ~/projects/site/index.html
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON configuration file
    #[arg(long, value_name = "FILE", env = "FSPROXY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the proxy tree below a folder
    Tree(tree::Args),

    /// Print change events below a folder until interrupted
    Watch(watch::Args),

    /// Acquire a lock on a file and hold it until interrupted
    Lock(lock::Args),

    /// Show what the cache knows about one path
    Stat(stat::Args),
}

/// Exit status for failures the cache reported as a protocol conflict
/// (held lock, denied stream, kind mismatch).
const EXIT_CONFLICT: u8 = 3;
const EXIT_FAILURE: u8 = 1;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Tree(args) => tree::execute(&args, config),
        Commands::Watch(args) => watch::execute(&args, config),
        Commands::Lock(args) => lock::execute(&args, config),
        Commands::Stat(args) => stat::execute(&args, config),
    }
}

fn load_config(path: Option<&Path>) -> Result<ProxyConfig> {
    let config = match path {
        Some(path) => ProxyConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(fs_err) = cause.downcast_ref::<FsError>()
            && matches!(
                fs_err,
                FsError::AlreadyLocked { .. }
                    | FsError::AccessDenied { .. }
                    | FsError::StructuralConflict { .. }
            )
        {
            return EXIT_CONFLICT;
        }
    }
    EXIT_FAILURE
}
