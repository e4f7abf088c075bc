//! Per-root registry of proxy nodes.
//!
//! An [`ObjectCache`] owns every [`ProxyNode`] below one mounted root and
//! guarantees at most one live node per [`Identity`]. Resolution goes
//! through the identity namer, then the registry, and only then the disk.
//!
//! # Locking
//!
//! The registry is guarded by one `RwLock` that is only ever held over
//! in-memory bookkeeping. Node construction (which may stat a file), event
//! delivery and stream arbitration all happen outside it.
//!
//! A second `RwLock` orders renames against lookups: a rename holds it for
//! writing from the native rename until the registry is re-keyed, and a
//! lookup that misses holds it for reading while it publishes.

mod refresh;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, instrument, trace};

use crate::config::ProxyConfig;
use crate::error::{FsError, FsResult};
use crate::listener::RecursiveListeners;
use crate::lock::{LockManager, SentinelNames};
use crate::metrics::CacheMetrics;
use crate::naming::{
    EntryKind, HiddenNames, Identity, IdentityNamer, NativeNamer, key_is_descendant,
    normalize_path,
};
use crate::node::{EventKind, ListenerId, ListenerList, NodeEvent, NodeListener, ProxyNode};
use crate::stream::StreamArbiter;

pub use refresh::{CancelFlag, PreferredNext, RefreshOptions, RefreshReport};

pub(crate) struct CacheInner {
    root: Identity,
    config: ProxyConfig,
    namer: Arc<dyn IdentityNamer>,
    nodes: RwLock<HashMap<Identity, Arc<ProxyNode>>>,
    locks: LockManager,
    streams: StreamArbiter,
    metrics: CacheMetrics,
    /// Root-wide listeners, notified of every primary event.
    listeners: ListenerList,
    recursive: RecursiveListeners,
    hidden: HiddenNames,
    next_event: AtomicU64,
    /// Held for writing while a remap re-keys identities and the registry,
    /// and for reading while a lookup miss publishes a node.
    relocation: RwLock<()>,
}

impl CacheInner {
    pub(crate) fn namer(&self) -> &Arc<dyn IdentityNamer> {
        &self.namer
    }

    pub(crate) fn hidden(&self) -> &HiddenNames {
        &self.hidden
    }

    pub(crate) fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

/// Held from a native rename or move until its proxies are re-keyed, so
/// lookups of either path never publish a node mid-rename.
pub(crate) struct RelocationGuard<'a> {
    _held: RwLockWriteGuard<'a, ()>,
}

/// Registry of proxies below one root folder.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ObjectCache {
    inner: Arc<CacheInner>,
}

impl ObjectCache {
    /// Mount `root` with a private namer, lock manager and stream arbiter.
    pub fn new(root: &Path, config: ProxyConfig) -> FsResult<Self> {
        let namer: Arc<dyn IdentityNamer> = Arc::new(NativeNamer::new(config.name_equality));
        let locks = LockManager::new(SentinelNames::from_config(&config));
        let streams = StreamArbiter::from_config(&config);
        Self::with_parts(root, config, namer, locks, streams)
    }

    /// Mount `root` sharing collaborators with other caches.
    pub fn with_parts(
        root: &Path,
        config: ProxyConfig,
        namer: Arc<dyn IdentityNamer>,
        locks: LockManager,
        streams: StreamArbiter,
    ) -> FsResult<Self> {
        let root_path = normalize_path(root);
        match EntryKind::probe(&root_path).map_err(|e| FsError::io("stat", &root_path, e))? {
            Some(EntryKind::Folder) => {}
            Some(found) => {
                return Err(FsError::StructuralConflict {
                    path: root_path,
                    expected: EntryKind::Folder,
                    found,
                });
            }
            None => return Err(FsError::NotFound { path: root_path }),
        }

        let hidden = SentinelNames::from_config(&config).hidden();
        let root = namer.from_path(&root_path);
        let inner = Arc::new(CacheInner {
            root,
            recursive: RecursiveListeners::new(config.max_listener_depth),
            config,
            namer,
            nodes: RwLock::new(HashMap::new()),
            locks,
            streams,
            metrics: CacheMetrics::new(),
            listeners: ListenerList::default(),
            hidden,
            next_event: AtomicU64::new(1),
            relocation: RwLock::new(()),
        });
        debug!(root = %root_path.display(), "Mounted object cache");
        Ok(Self { inner })
    }

    pub(crate) fn upgrade(weak: &Weak<CacheInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn root_identity(&self) -> &Identity {
        &self.inner.root
    }

    pub fn root_path(&self) -> &Path {
        self.inner.root.native_path()
    }

    /// The root folder proxy.
    pub fn root(&self) -> Arc<ProxyNode> {
        self.materialize(self.inner.root.clone(), EntryKind::Folder)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn namer(&self) -> &Arc<dyn IdentityNamer> {
        &self.inner.namer
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    pub fn streams(&self) -> &StreamArbiter {
        &self.inner.streams
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    pub(crate) fn hidden(&self) -> &HiddenNames {
        &self.inner.hidden
    }

    pub(crate) fn recursive(&self) -> &RecursiveListeners {
        &self.inner.recursive
    }

    /// Number of registered proxies.
    pub fn len(&self) -> usize {
        self.inner.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `path` is the root or lies below it.
    pub fn contains_path(&self, path: &Path) -> bool {
        let key = self
            .inner
            .namer
            .equality()
            .normalize(&normalize_path(path).to_string_lossy());
        let root = self.inner.root.key();
        key == root || key_is_descendant(root, &key)
    }

    /// Register a listener notified of every primary event in this cache.
    pub fn add_listener(&self, listener: Arc<dyn NodeListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub(crate) fn cached_id(&self, identity: &Identity) -> Option<Arc<ProxyNode>> {
        self.inner
            .nodes
            .read()
            .get(identity)
            .filter(|n| n.is_valid())
            .cloned()
    }

    /// The live proxy for `path`, if one is registered. Never touches the disk.
    pub fn cached(&self, path: &Path) -> Option<Arc<ProxyNode>> {
        let identity = self.inner.namer.lookup(path)?;
        self.cached_id(&identity)
    }

    /// Resolve `path` to a proxy, or `None` if nothing supported is there.
    #[instrument(level = "trace", skip(self, path), fields(path = %path.display()))]
    pub fn find(&self, path: &Path) -> FsResult<Option<Arc<ProxyNode>>> {
        let path = normalize_path(path);
        if !self.contains_path(&path) {
            return Ok(None);
        }
        if let Some(identity) = self.inner.namer.lookup(&path)
            && let Some(node) = self.cached_id(&identity)
        {
            self.inner.metrics.record_hit();
            return Ok(Some(node));
        }

        self.inner.metrics.record_miss();
        self.inner.metrics.record_stat();
        let kind = EntryKind::probe(&path).map_err(|e| FsError::io("stat", &path, e))?;
        let kind = match kind {
            Some(kind @ (EntryKind::File | EntryKind::Folder)) => kind,
            Some(EntryKind::Unsupported) => {
                debug!(path = %path.display(), "Unsupported entry, no proxy");
                return Ok(None);
            }
            None => return Ok(None),
        };

        let (identity, node, stale, over_capacity) = {
            let _relocation = self.inner.relocation.read();
            let identity = self.inner.namer.from_path(&path);
            let (node, stale, over_capacity) = self.publish(identity.clone(), kind);
            (identity, node, stale, over_capacity)
        };
        self.settle(stale, over_capacity);
        if let Some(parent) = identity.parent().and_then(|p| self.cached_id(p))
            && let Some(index) = parent.children_index()
            && index.kind_of(identity.name()).is_none()
        {
            index.insert(identity, kind);
        }
        Ok(Some(node))
    }

    /// Resolve `path`, failing with `NotFound` when nothing is there.
    pub fn resolve(&self, path: &Path) -> FsResult<Arc<ProxyNode>> {
        self.find(path)?.ok_or_else(|| FsError::NotFound {
            path: normalize_path(path),
        })
    }

    pub fn resolve_folder(&self, path: &Path) -> FsResult<Arc<ProxyNode>> {
        self.resolve_kind(path, EntryKind::Folder)
    }

    pub fn resolve_file(&self, path: &Path) -> FsResult<Arc<ProxyNode>> {
        self.resolve_kind(path, EntryKind::File)
    }

    fn resolve_kind(&self, path: &Path, expected: EntryKind) -> FsResult<Arc<ProxyNode>> {
        let node = self.resolve(path)?;
        if node.kind() == expected {
            Ok(node)
        } else {
            Err(FsError::StructuralConflict {
                path: node.path(),
                expected,
                found: node.kind(),
            })
        }
    }

    /// Publish a proxy for `identity`, or return the live one already there.
    ///
    /// A registered node of the wrong kind is replaced and invalidated.
    pub(crate) fn materialize(&self, identity: Identity, kind: EntryKind) -> Arc<ProxyNode> {
        let (node, stale, over_capacity) = self.publish(identity, kind);
        self.settle(stale, over_capacity);
        node
    }

    /// Registry half of [`materialize`](Self::materialize): returns the node,
    /// any replaced stale node, and whether the registry is over capacity.
    fn publish(
        &self,
        identity: Identity,
        kind: EntryKind,
    ) -> (Arc<ProxyNode>, Option<Arc<ProxyNode>>, bool) {
        if let Some(existing) = self.inner.nodes.read().get(&identity)
            && existing.is_valid()
            && existing.kind() == kind
        {
            return (Arc::clone(existing), None, false);
        }

        let candidate = ProxyNode::new(identity.clone(), kind, &self.inner);

        let mut nodes = self.inner.nodes.write();
        if let Some(existing) = nodes.get(&identity)
            && existing.is_valid()
            && existing.kind() == kind
        {
            return (Arc::clone(existing), None, false);
        }
        let stale = nodes.insert(identity, Arc::clone(&candidate));
        let over_capacity = self
            .inner
            .config
            .max_cached_nodes
            .is_some_and(|limit| nodes.len() > limit);
        drop(nodes);

        self.inner.metrics.record_created();
        trace!(path = %candidate.path().display(), %kind, "Published proxy");
        (candidate, stale, over_capacity)
    }

    fn settle(&self, stale: Option<Arc<ProxyNode>>, over_capacity: bool) {
        if let Some(stale) = stale
            && stale.mark_invalid()
        {
            debug!(path = %stale.path().display(), "Replaced proxy of another kind");
            self.inner.metrics.record_invalidated();
            self.fire_cascaded(&stale);
        }
        if over_capacity {
            self.evict_unused();
        }
    }

    /// Existence check that avoids disk I/O where the cache already knows.
    ///
    /// A live proxy answers `true` without a stat. Otherwise the entry is
    /// stat'ed; if the parent's children index disagrees with the stat, the
    /// child is looked up once more and the index corrected before the
    /// answer is trusted.
    pub fn exists(&self, path: &Path) -> FsResult<bool> {
        let path = normalize_path(path);
        if let Some(identity) = self.inner.namer.lookup(&path)
            && self.cached_id(&identity).is_some()
        {
            self.inner.metrics.record_hit();
            return Ok(true);
        }

        let parent = path
            .parent()
            .and_then(|p| self.inner.namer.lookup(p))
            .and_then(|id| self.cached_id(&id))
            .filter(|p| p.is_folder());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let listed = parent
            .as_ref()
            .and_then(|p| p.children_index())
            .and_then(|index| index.contains(&name));

        self.inner.metrics.record_stat();
        let on_disk = matches!(
            EntryKind::probe(&path).map_err(|e| FsError::io("stat", &path, e))?,
            Some(EntryKind::File | EntryKind::Folder)
        );

        match (listed, parent.as_ref().and_then(|p| p.children_index())) {
            (Some(listed), Some(index)) if listed != on_disk => {
                debug!(
                    path = %path.display(),
                    listed,
                    on_disk,
                    "Children index disagrees with disk, confirming"
                );
                self.inner.metrics.record_stat();
                Ok(index.child(&name, true)?.is_some())
            }
            _ => Ok(on_disk),
        }
    }

    /// Re-key `old` and its cached descendants after a rename or move to
    /// `new_path`.
    ///
    /// Proxy instances are kept; only their identities change. The old and
    /// new parents' children indexes are updated in the same registry write
    /// scope. Returns the `(old, new)` identity pairs, `old` itself first.
    pub fn remap_for_rename(
        &self,
        old: &Identity,
        new_path: &Path,
    ) -> FsResult<Vec<(Identity, Identity)>> {
        self.remap(old, &normalize_path(new_path), self.begin_relocation())
    }

    pub(crate) fn begin_relocation(&self) -> RelocationGuard<'_> {
        RelocationGuard {
            _held: self.inner.relocation.write(),
        }
    }

    /// Re-key under `relocation`, which is released once the registry and
    /// children indexes agree with the disk.
    pub(crate) fn remap(
        &self,
        old: &Identity,
        new_path: &Path,
        relocation: RelocationGuard<'_>,
    ) -> FsResult<Vec<(Identity, Identity)>> {
        let probed = EntryKind::probe(new_path).ok().flatten();
        let pairs = self.inner.namer.relocate(old, new_path)?;
        let Some((_, new_id)) = pairs.first().cloned() else {
            return Ok(pairs);
        };

        let mut displaced = Vec::new();
        {
            let mut nodes = self.inner.nodes.write();
            let moved: Vec<(Arc<ProxyNode>, Identity)> = pairs
                .iter()
                .filter_map(|(o, n)| nodes.remove(o).map(|node| (node, n.clone())))
                .collect();
            for (node, new) in moved {
                node.set_identity(new.clone());
                if let Some(previous) = nodes.insert(new, Arc::clone(&node))
                    && !Arc::ptr_eq(&previous, &node)
                {
                    displaced.push(previous);
                }
            }

            let kind = nodes.get(&new_id).map(|n| n.kind()).or(probed);
            if let Some(index) = old
                .parent()
                .and_then(|p| nodes.get(p))
                .and_then(|p| p.children_index())
            {
                index.remove(old);
            }
            if let Some(kind @ (EntryKind::File | EntryKind::Folder)) = kind
                && let Some(index) = new_id
                    .parent()
                    .and_then(|p| nodes.get(p))
                    .and_then(|p| p.children_index())
            {
                index.insert(new_id.clone(), kind);
            }
        }
        drop(relocation);

        for node in displaced {
            if node.mark_invalid() {
                self.inner.metrics.record_invalidated();
                self.fire(&node, EventKind::Deleted, false);
            }
        }
        debug!(
            from = %old.native_path().display(),
            to = %new_id.native_path().display(),
            remapped = pairs.len(),
            "Remapped proxies"
        );
        Ok(pairs)
    }

    /// Remove every cached node at or below `identity` from the registry.
    fn detach(&self, identity: &Identity) -> Vec<Arc<ProxyNode>> {
        let mut nodes = self.inner.nodes.write();
        let keys: Vec<Identity> = nodes
            .keys()
            .filter(|k| identity.contains(k))
            .cloned()
            .collect();
        let mut detached: Vec<Arc<ProxyNode>> =
            keys.iter().filter_map(|k| nodes.remove(k)).collect();
        drop(nodes);
        detached.sort_by_key(|n| n.identity().depth());
        detached
    }

    /// Invalidate detached nodes and announce the deletion of `identity`.
    fn announce(
        &self,
        identity: &Identity,
        detached: Vec<Arc<ProxyNode>>,
        kind: EntryKind,
        expected: bool,
    ) -> usize {
        let mut count = 0;
        for node in &detached {
            if node.mark_invalid() {
                self.inner.metrics.record_invalidated();
                count += 1;
            }
        }

        let (primary, cascaded): (Vec<_>, Vec<_>) = detached
            .into_iter()
            .partition(|n| n.identity() == *identity);
        let primary = primary
            .into_iter()
            .next()
            .unwrap_or_else(|| ProxyNode::detached(identity.clone(), kind, &self.inner));
        self.fire(&primary, EventKind::Deleted, expected);
        for node in &cascaded {
            self.fire_cascaded(node);
        }
        count
    }

    /// Announce a child found missing by a folder rescan.
    ///
    /// The parent's index already reflects the disk, so only the registry
    /// is touched.
    pub(crate) fn announce_removed(&self, identity: &Identity, kind: EntryKind, expected: bool) {
        let detached = self.detach(identity);
        self.announce(identity, detached, kind, expected);
    }

    /// Invalidate every cached node at or below `path` without a fresh stat.
    ///
    /// Returns the number of nodes invalidated.
    pub fn invalidate_subtree(&self, path: &Path) -> usize {
        self.invalidate_subtree_with(path, false)
    }

    pub(crate) fn invalidate_subtree_with(&self, path: &Path, expected: bool) -> usize {
        let path = normalize_path(path);
        let Some(identity) = self.inner.namer.lookup(&path) else {
            return 0;
        };

        let detached = self.detach(&identity);
        if let Some(parent) = identity.parent().and_then(|p| self.cached_id(p))
            && let Some(index) = parent.children_index()
        {
            index.remove(&identity);
        }
        if detached.is_empty() {
            self.inner.namer.forget(&identity);
            return 0;
        }

        let kind = detached
            .iter()
            .find(|n| n.identity() == identity)
            .map_or(EntryKind::Folder, |n| n.kind());
        let count = self.announce(&identity, detached, kind, expected);
        self.inner.namer.forget(&identity);
        debug!(path = %path.display(), invalidated = count, "Invalidated subtree");
        count
    }

    /// Drop registry entries that nothing outside the cache holds.
    ///
    /// Nodes with listeners and the root are kept. Returns the number of
    /// entries dropped.
    pub fn evict_unused(&self) -> usize {
        let root = self.inner.root.clone();
        let mut nodes = self.inner.nodes.write();
        let before = nodes.len();
        nodes.retain(|id, node| {
            *id == root || Arc::strong_count(node) > 1 || node.has_listeners()
        });
        let evicted = before - nodes.len();
        drop(nodes);
        if evicted > 0 {
            self.inner.metrics.record_evictions(evicted as u64);
            debug!(evicted, "Evicted unused proxies");
        }
        evicted
    }

    fn next_event_id(&self) -> u64 {
        self.inner.next_event.fetch_add(1, Ordering::Relaxed)
    }

    /// Fire the primary event for `node` and its correlated parent event.
    pub(crate) fn fire(
        &self,
        node: &Arc<ProxyNode>,
        kind: EventKind,
        expected: bool,
    ) -> Arc<NodeEvent> {
        self.fire_with(node, kind, expected, &[])
    }

    /// Deliver one event for a change to `node`.
    ///
    /// The primary event goes to `node`'s listeners and to root-wide
    /// listeners. The parent folder (and any `extra_parents`, such as the
    /// old parent of a move) receives one correlated event each, if it has
    /// listeners.
    pub(crate) fn fire_with(
        &self,
        node: &Arc<ProxyNode>,
        kind: EventKind,
        expected: bool,
        extra_parents: &[Arc<ProxyNode>],
    ) -> Arc<NodeEvent> {
        let identity = node.identity();
        let primary = Arc::new(NodeEvent {
            id: self.next_event_id(),
            kind,
            file: Arc::clone(node),
            source: Arc::clone(node),
            path: identity.native_path().to_path_buf(),
            expected,
            cascaded: false,
            time: SystemTime::now(),
            cause: None,
        });
        self.inner.metrics.record_event();
        trace!(path = %primary.path.display(), kind = ?primary.kind, "Firing event");

        node.listeners().notify(&primary);
        self.inner.listeners.notify(&primary);

        let mut parents: Vec<Arc<ProxyNode>> = Vec::with_capacity(1 + extra_parents.len());
        if identity != self.inner.root
            && let Some(parent) = identity.parent().and_then(|p| self.cached_id(p))
        {
            parents.push(parent);
        }
        for extra in extra_parents {
            if !parents.iter().any(|p| Arc::ptr_eq(p, extra)) {
                parents.push(Arc::clone(extra));
            }
        }

        for parent in parents {
            if Arc::ptr_eq(&parent, node) || !parent.has_listeners() {
                continue;
            }
            let correlated = NodeEvent {
                id: self.next_event_id(),
                source: Arc::clone(&parent),
                cause: Some(Arc::clone(&primary)),
                ..(*primary).clone()
            };
            parent.listeners().notify(&correlated);
        }
        primary
    }

    /// Tell `node`'s own listeners it went away with an ancestor.
    pub(crate) fn fire_cascaded(&self, node: &Arc<ProxyNode>) {
        if !node.has_listeners() {
            return;
        }
        let event = NodeEvent {
            id: self.next_event_id(),
            kind: EventKind::Deleted,
            file: Arc::clone(node),
            source: Arc::clone(node),
            path: node.path(),
            expected: false,
            cascaded: true,
            time: SystemTime::now(),
            cause: None,
        };
        node.listeners().notify(&event);
    }

    /// Live proxies, optionally restricted to those at or below `roots`.
    pub(crate) fn live_nodes(&self, roots: &[PathBuf]) -> Vec<Arc<ProxyNode>> {
        let equality = self.inner.namer.equality();
        let root_keys: Vec<String> = roots
            .iter()
            .map(|r| equality.normalize(&normalize_path(r).to_string_lossy()))
            .collect();
        let nodes = self.inner.nodes.read();
        nodes
            .iter()
            .filter(|(_, node)| node.is_valid())
            .filter(|(id, _)| {
                root_keys.is_empty()
                    || root_keys
                        .iter()
                        .any(|r| id.key() == r || key_is_descendant(r, id.key()))
            })
            .map(|(_, node)| Arc::clone(node))
            .collect()
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("root", &self.root_path())
            .field("nodes", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NameEquality;
    use std::fs;
    use std::time::Duration;

    fn cache_in(dir: &Path) -> ObjectCache {
        let config = ProxyConfig::default()
            .with_name_equality(NameEquality::Exact)
            .with_stream_retry(2, Duration::from_millis(5));
        ObjectCache::new(dir, config).unwrap()
    }

    #[test]
    fn test_resolution_converges_on_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let cache = cache_in(dir.path());

        let a = cache.resolve(&dir.path().join("a.txt")).unwrap();
        let b = cache.resolve(&dir.path().join("./a.txt")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.find(&dir.path().join("missing")).unwrap().is_none());
        assert!(cache.resolve(&dir.path().join("missing")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_outside_root_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        fs::create_dir(&inner).unwrap();
        fs::write(dir.path().join("outside.txt"), b"").unwrap();
        let cache = cache_in(&inner);
        assert!(cache.find(&dir.path().join("outside.txt")).unwrap().is_none());
        assert!(!cache.contains_path(&dir.path().join("inner2")));
    }

    #[test]
    fn test_structural_conflict() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let cache = cache_in(dir.path());
        let err = cache.resolve_file(&dir.path().join("sub")).unwrap_err();
        assert!(matches!(
            err,
            FsError::StructuralConflict {
                expected: EntryKind::File,
                found: EntryKind::Folder,
                ..
            }
        ));
        assert!(cache.resolve_folder(&dir.path().join("sub")).is_ok());
    }

    #[test]
    fn test_exists_on_cached_node_skips_stat() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let cache = cache_in(dir.path());
        let _node = cache.resolve(&dir.path().join("a.txt")).unwrap();

        let before = cache.metrics().snapshot();
        assert!(cache.exists(&dir.path().join("a.txt")).unwrap());
        assert_eq!(cache.metrics().snapshot().since(&before).stats, 0);
    }

    #[test]
    fn test_exists_confirms_stale_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let root = cache.root();
        assert!(root.children().unwrap().is_empty());

        // Created behind the cache's back: the index says absent, disk says present.
        fs::write(dir.path().join("late.txt"), b"").unwrap();
        assert!(cache.exists(&dir.path().join("late.txt")).unwrap());
        assert_eq!(
            root.children_index().unwrap().contains("late.txt"),
            Some(true)
        );
    }

    #[test]
    fn test_evict_unused_keeps_held_nodes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();
        fs::write(dir.path().join("b"), b"").unwrap();
        let cache = cache_in(dir.path());
        let held = cache.resolve(&dir.path().join("a")).unwrap();
        drop(cache.resolve(&dir.path().join("b")).unwrap());

        assert_eq!(cache.evict_unused(), 1);
        assert!(cache.cached(&dir.path().join("a")).is_some());
        assert!(cache.cached(&dir.path().join("b")).is_none());
        assert!(held.is_valid());
    }

    #[test]
    fn test_capacity_triggers_eviction() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}")), b"").unwrap();
        }
        let config = ProxyConfig::default().with_max_cached_nodes(Some(2));
        let cache = ObjectCache::new(dir.path(), config).unwrap();
        for i in 0..5 {
            drop(cache.resolve(&dir.path().join(format!("f{i}"))).unwrap());
        }
        assert!(cache.len() <= 3);
        assert!(cache.metrics().snapshot().evictions > 0);
    }

    #[test]
    fn test_mount_requires_folder() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file"), b"").unwrap();
        assert!(matches!(
            ObjectCache::new(&dir.path().join("file"), ProxyConfig::default()),
            Err(FsError::StructuralConflict { .. })
        ));
        assert!(matches!(
            ObjectCache::new(&dir.path().join("nope"), ProxyConfig::default()),
            Err(FsError::NotFound { .. })
        ));
    }
}
