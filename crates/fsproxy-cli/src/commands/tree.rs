//! Tree command - resolve a folder and print its proxy tree.
//!
//! # Examples
//!
//! ```bash
//! fsproxy tree ~/site
//! fsproxy tree ~/site --depth 2 --json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use fsproxy_core::{ProxyConfig, ProxyNode};

use super::mount_for;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Folder to print
    pub root: PathBuf,

    /// Stop descending below this depth
    #[arg(long)]
    pub depth: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct TreeEntry {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TreeEntry>,
}

fn collect(node: &Arc<ProxyNode>, depth: usize, limit: Option<usize>) -> Result<TreeEntry> {
    let mut children = Vec::new();
    if node.is_folder() && limit.is_none_or(|max| depth < max) {
        for child in node
            .children()
            .with_context(|| format!("Failed to list {}", node.path().display()))?
        {
            children.push(collect(&child, depth + 1, limit)?);
        }
    }
    Ok(TreeEntry {
        name: node.name(),
        kind: node.kind().to_string(),
        children,
    })
}

fn print_entry(entry: &TreeEntry, prefix: &str, last: bool, out: &mut String) {
    let branch = if last { "└── " } else { "├── " };
    let marker = if entry.kind == "folder" { "/" } else { "" };
    out.push_str(&format!("{prefix}{branch}{}{marker}\n", entry.name));
    let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
    for (i, child) in entry.children.iter().enumerate() {
        print_entry(child, &nested, i + 1 == entry.children.len(), out);
    }
}

#[instrument(level = "info", name = "cmd::tree", skip_all, fields(root = %args.root.display()))]
pub fn execute(args: &Args, config: ProxyConfig) -> Result<()> {
    let (_registry, cache) = mount_for(&args.root, config)?;
    let root = cache.resolve_folder(&args.root)?;
    let tree = collect(&root, 0, args.depth)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    let mut out = format!("{}\n", root.path().display());
    for (i, child) in tree.children.iter().enumerate() {
        print_entry(child, "", i + 1 == tree.children.len(), &mut out);
    }
    print!("{out}");

    let stats = cache.metrics().snapshot();
    tracing::info!(nodes = cache.len(), stats = stats.stats, "Tree resolved");
    Ok(())
}
