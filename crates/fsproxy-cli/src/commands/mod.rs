pub mod lock;
pub mod stat;
pub mod tree;
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fsproxy_core::{ObjectCache, ProxyConfig, ProxyRegistry};

/// Mount the folder that holds `path` (or `path` itself for folders).
pub(crate) fn mount_for(path: &Path, config: ProxyConfig) -> Result<(ProxyRegistry, ObjectCache)> {
    let root: PathBuf = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("{} has no parent folder", path.display()))?
    };
    let registry = ProxyRegistry::new(config);
    let cache = registry
        .mount(&root)
        .with_context(|| format!("Failed to mount {}", root.display()))?;
    Ok((registry, cache))
}
