//! Process-wide set of mounted caches.
//!
//! Every cache mounted through one [`ProxyRegistry`] shares its identity
//! namer, lock manager, and stream arbiter, so a file reached through two
//! overlapping roots still has one identity, one lock, and one set of
//! stream tickets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::cache::{ObjectCache, RefreshOptions, RefreshReport};
use crate::config::ProxyConfig;
use crate::error::{FsError, FsResult};
use crate::lock::{LockManager, SentinelNames};
use crate::naming::{IdentityNamer, NativeNamer, normalize_path};
use crate::node::ProxyNode;
use crate::stream::StreamArbiter;

#[derive(Debug)]
pub struct ProxyRegistry {
    config: ProxyConfig,
    namer: Arc<dyn IdentityNamer>,
    locks: LockManager,
    streams: StreamArbiter,
    caches: DashMap<PathBuf, ObjectCache>,
}

impl ProxyRegistry {
    pub fn new(config: ProxyConfig) -> Self {
        let namer = Arc::new(NativeNamer::new(config.name_equality));
        Self::with_namer(config, namer)
    }

    /// Use a custom identity namer for every cache.
    pub fn with_namer(config: ProxyConfig, namer: Arc<dyn IdentityNamer>) -> Self {
        Self {
            locks: LockManager::new(SentinelNames::from_config(&config)),
            streams: StreamArbiter::from_config(&config),
            namer,
            config,
            caches: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn namer(&self) -> &Arc<dyn IdentityNamer> {
        &self.namer
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn streams(&self) -> &StreamArbiter {
        &self.streams
    }

    /// Mount `root`, or return the cache already mounted there.
    ///
    /// The root is normalized lexically; symlinks are not resolved.
    pub fn mount(&self, root: &Path) -> FsResult<ObjectCache> {
        let root = normalize_path(root);
        if let Some(existing) = self.caches.get(&root) {
            return Ok(existing.clone());
        }
        let cache = ObjectCache::with_parts(
            &root,
            self.config.clone(),
            Arc::clone(&self.namer),
            self.locks.clone(),
            self.streams.clone(),
        )?;
        let cache = self.caches.entry(root.clone()).or_insert(cache).clone();
        info!(root = %root.display(), "Mounted root");
        Ok(cache)
    }

    /// Forget the cache mounted at `root`. Proxies already handed out stay
    /// usable until their cache is dropped.
    pub fn unmount(&self, root: &Path) -> Option<ObjectCache> {
        let removed = self.caches.remove(&normalize_path(root)).map(|(_, c)| c);
        if removed.is_some() {
            debug!(root = %root.display(), "Unmounted root");
        }
        removed
    }

    /// Mounted roots, sorted.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.caches.iter().map(|e| e.key().clone()).collect();
        roots.sort();
        roots
    }

    /// The cache with the deepest root containing `path`.
    pub fn cache_for(&self, path: &Path) -> Option<ObjectCache> {
        let path = normalize_path(path);
        self.caches
            .iter()
            .filter(|e| e.value().contains_path(&path))
            .max_by_key(|e| e.key().components().count())
            .map(|e| e.value().clone())
    }

    pub fn find(&self, path: &Path) -> FsResult<Option<Arc<ProxyNode>>> {
        match self.cache_for(path) {
            Some(cache) => cache.find(path),
            None => Ok(None),
        }
    }

    /// Resolve `path` through the cache that owns it.
    pub fn resolve(&self, path: &Path) -> FsResult<Arc<ProxyNode>> {
        let cache = self.cache_for(path).ok_or_else(|| FsError::InvalidTarget {
            path: normalize_path(path),
            reason: "path is not below any mounted root",
        })?;
        cache.resolve(path)
    }

    /// Bulk-refresh every mounted cache in turn.
    pub fn refresh_all(&self, options: &RefreshOptions) -> Vec<(PathBuf, RefreshReport)> {
        let caches: Vec<(PathBuf, ObjectCache)> = self
            .caches
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut reports = Vec::with_capacity(caches.len());
        for (root, cache) in caches {
            if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                break;
            }
            reports.push((root, cache.bulk_refresh(options)));
        }
        reports
    }

    /// Evict unused proxies from every cache. Returns the total evicted.
    pub fn evict_unused(&self) -> usize {
        let caches: Vec<ObjectCache> = self.caches.iter().map(|e| e.value().clone()).collect();
        caches.iter().map(ObjectCache::evict_unused).sum()
    }
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self::new(ProxyConfig::default())
    }
}
