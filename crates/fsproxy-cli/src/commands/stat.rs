//! Stat command - show what the cache knows about one path.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;

use fsproxy_core::ProxyConfig;

use super::mount_for;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// File or folder to inspect
    pub path: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct NodeInfo {
    path: String,
    kind: String,
    valid: bool,
    /// Seconds since the Unix epoch.
    modified: Option<u64>,
    read_only: bool,
    size: Option<u64>,
    children: Option<usize>,
}

pub fn execute(args: &Args, config: ProxyConfig) -> Result<()> {
    let (_registry, cache) = mount_for(&args.path, config)?;
    let node = cache.resolve(&args.path)?;

    let info = NodeInfo {
        path: node.path().display().to_string(),
        kind: node.kind().to_string(),
        valid: node.is_valid(),
        modified: node
            .last_modified()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs()),
        read_only: node.is_read_only(),
        size: node.is_file().then(|| node.size()).transpose()?,
        children: if node.is_folder() {
            Some(node.children()?.len())
        } else {
            None
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("Path:      {}", info.path);
    println!("Kind:      {}", info.kind);
    println!("Valid:     {}", info.valid);
    if let Some(modified) = info.modified {
        println!("Modified:  {modified}");
    }
    println!("Read-only: {}", info.read_only);
    if let Some(size) = info.size {
        println!("Size:      {size} bytes");
    }
    if let Some(children) = info.children {
        println!("Children:  {children}");
    }
    Ok(())
}
