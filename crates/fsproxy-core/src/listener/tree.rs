use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::FsResult;
use crate::node::{EventKind, ListenerId, ListenerList, NodeEvent, NodeListener, ProxyNode};

const DELIVERED_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

struct Watched {
    node: Arc<ProxyNode>,
    dispatcher: ListenerId,
    depth: usize,
    /// Canonical paths from the tree root down to and including this folder.
    chain: Vec<PathBuf>,
}

/// Installed on every watched folder; forwards to the owning tree.
struct Dispatcher {
    tree: Weak<ListenerTree>,
}

impl NodeListener for Dispatcher {
    fn on_event(&self, event: &NodeEvent) {
        if let Some(tree) = self.tree.upgrade() {
            tree.handle(event);
        }
    }
}

/// The set of folders followed on behalf of one folder's recursive
/// listeners.
///
/// Every change below the root reaches the tree through one or more
/// watched folders. Copies of the same change share a logical event id and
/// are delivered once.
pub struct ListenerTree {
    root: Arc<ProxyNode>,
    max_depth: usize,
    watched: Mutex<HashMap<usize, Watched>>,
    listeners: ListenerList,
    delivered: Mutex<LruCache<u64, ()>>,
}

impl ListenerTree {
    pub(crate) fn new(root: Arc<ProxyNode>, max_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            root,
            max_depth,
            watched: Mutex::new(HashMap::new()),
            listeners: ListenerList::default(),
            delivered: Mutex::new(LruCache::new(DELIVERED_CAPACITY)),
        })
    }

    pub fn root(&self) -> &Arc<ProxyNode> {
        &self.root
    }

    pub(crate) fn listeners(&self) -> &ListenerList {
        &self.listeners
    }

    /// Paths of the folders currently watched, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watched.lock().values().map(|w| w.node.path()).collect();
        paths.sort();
        paths
    }

    pub fn is_watching(&self, folder: &Arc<ProxyNode>) -> bool {
        self.watched.lock().contains_key(&folder.addr())
    }

    pub(crate) fn watch_root(self: &Arc<Self>) -> FsResult<()> {
        let root = Arc::clone(&self.root);
        self.fold_in(&root, 0, &[])
    }

    /// Start watching `folder` and every folder below it.
    fn fold_in(self: &Arc<Self>, folder: &Arc<ProxyNode>, depth: usize, above: &[PathBuf]) -> FsResult<()> {
        if !folder.is_valid() || !folder.is_folder() {
            return Ok(());
        }
        if depth > self.max_depth {
            warn!(
                path = %folder.path().display(),
                max_depth = self.max_depth,
                "Listener depth limit reached, not descending"
            );
            return Ok(());
        }
        let canonical = fs::canonicalize(folder.path()).unwrap_or_else(|_| folder.path());
        if above.contains(&canonical) {
            warn!(
                path = %folder.path().display(),
                target = %canonical.display(),
                "Folder cycle detected, not descending"
            );
            return Ok(());
        }

        let mut chain = above.to_vec();
        chain.push(canonical);
        {
            let mut watched = self.watched.lock();
            if watched.contains_key(&folder.addr()) {
                return Ok(());
            }
            let dispatcher = folder.add_listener(Arc::new(Dispatcher {
                tree: Arc::downgrade(self),
            }));
            watched.insert(
                folder.addr(),
                Watched {
                    node: Arc::clone(folder),
                    dispatcher,
                    depth,
                    chain: chain.clone(),
                },
            );
        }
        trace!(path = %folder.path().display(), depth, "Watching folder");

        for child in folder.children()? {
            if child.is_folder() {
                self.fold_in(&child, depth + 1, &chain)?;
            }
        }
        Ok(())
    }

    /// Stop watching every folder matching `gone`.
    fn prune(&self, gone: impl Fn(&Arc<ProxyNode>) -> bool) {
        let removed: Vec<Watched> = {
            let mut watched = self.watched.lock();
            let keys: Vec<usize> = watched
                .iter()
                .filter(|(_, w)| gone(&w.node))
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| watched.remove(k)).collect()
        };
        for entry in removed {
            trace!(path = %entry.node.path().display(), "No longer watching folder");
            entry.node.remove_listener(entry.dispatcher);
        }
    }

    pub(crate) fn teardown(&self) {
        self.prune(|_| true);
    }

    /// Depth and chain of the watched folder that contains `node`.
    fn placement(&self, node: &Arc<ProxyNode>) -> Option<(usize, Vec<PathBuf>)> {
        let parent = node.identity().parent()?.clone();
        let watched = self.watched.lock();
        watched
            .values()
            .find(|w| w.node.identity() == parent)
            .map(|w| (w.depth + 1, w.chain.clone()))
    }

    fn follow_new_folder(self: &Arc<Self>, folder: &Arc<ProxyNode>) {
        if self.is_watching(folder) {
            return;
        }
        let Some((depth, chain)) = self.placement(folder) else {
            return;
        };
        if let Err(e) = self.fold_in(folder, depth, &chain) {
            warn!(path = %folder.path().display(), error = %e, "Failed to follow new folder");
        }
    }

    fn handle(self: &Arc<Self>, event: &NodeEvent) {
        let file = &event.file;
        if event.cascaded {
            let addr = file.addr();
            self.prune(|n| n.addr() == addr || !n.is_valid());
            return;
        }

        if file.is_folder() {
            match &event.kind {
                EventKind::FolderCreated => self.follow_new_folder(file),
                EventKind::Deleted => {
                    let gone = file.identity();
                    self.prune(|n| !n.is_valid() || gone.contains(&n.identity()));
                }
                EventKind::Moved { .. } => {
                    let root = self.root.identity();
                    if root.contains(&file.identity()) {
                        self.follow_new_folder(file);
                    } else {
                        self.prune(|n| !root.contains(&n.identity()));
                    }
                }
                _ => {}
            }
        }

        if self.delivered.lock().put(event.logical_id(), ()).is_some() {
            return;
        }
        self.listeners.notify(event);
    }
}

impl std::fmt::Debug for ListenerTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerTree")
            .field("root", &self.root.path())
            .field("watched", &self.watched.lock().len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
