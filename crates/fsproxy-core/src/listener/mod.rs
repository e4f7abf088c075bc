//! Recursive listeners.
//!
//! A recursive listener on a folder hears about changes anywhere below it.
//! The first such listener on a folder walks the subtree and installs a
//! dispatcher on every folder it finds; the tree then follows folders as
//! they are created, deleted, or moved in and out. Removing the last
//! recursive listener tears the dispatchers down again.

mod tree;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::naming::EntryKind;
use crate::node::{ListenerId, NodeListener, ProxyNode};

pub use tree::ListenerTree;

/// Per-cache registry of listener trees, one per folder with recursive
/// listeners.
pub(crate) struct RecursiveListeners {
    max_depth: usize,
    trees: Mutex<HashMap<usize, Arc<ListenerTree>>>,
}

impl RecursiveListeners {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            trees: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add(
        &self,
        folder: &Arc<ProxyNode>,
        listener: Arc<dyn NodeListener>,
    ) -> FsResult<ListenerId> {
        folder.ensure_valid()?;
        if !folder.is_folder() {
            return Err(FsError::StructuralConflict {
                path: folder.path(),
                expected: EntryKind::Folder,
                found: folder.kind(),
            });
        }

        let (tree, created) = {
            let mut trees = self.trees.lock();
            match trees.get(&folder.addr()) {
                Some(tree) => (Arc::clone(tree), false),
                None => {
                    let tree = ListenerTree::new(Arc::clone(folder), self.max_depth);
                    trees.insert(folder.addr(), Arc::clone(&tree));
                    (tree, true)
                }
            }
        };
        let id = tree.listeners().add(listener);
        if created {
            if let Err(e) = tree.watch_root() {
                tree.listeners().remove(id);
                self.drop_tree(folder, &tree);
                return Err(e);
            }
            debug!(
                root = %folder.path().display(),
                folders = tree.watched_paths().len(),
                "Recursive listening started"
            );
        }
        Ok(id)
    }

    pub(crate) fn remove(&self, folder: &Arc<ProxyNode>, id: ListenerId) -> bool {
        let Some(tree) = self.tree(folder) else {
            return false;
        };
        if !tree.listeners().remove(id) {
            return false;
        }
        if tree.listeners().is_empty() {
            self.drop_tree(folder, &tree);
            debug!(root = %folder.path().display(), "Recursive listening stopped");
        }
        true
    }

    pub(crate) fn tree(&self, folder: &Arc<ProxyNode>) -> Option<Arc<ListenerTree>> {
        self.trees.lock().get(&folder.addr()).cloned()
    }

    fn drop_tree(&self, folder: &Arc<ProxyNode>, tree: &Arc<ListenerTree>) {
        {
            let mut trees = self.trees.lock();
            if trees
                .get(&folder.addr())
                .is_some_and(|t| Arc::ptr_eq(t, tree))
            {
                trees.remove(&folder.addr());
            }
        }
        tree.teardown();
    }
}

impl ProxyNode {
    /// Folders currently followed by recursive listeners rooted here.
    pub fn watched_folders(self: &Arc<Self>) -> Vec<std::path::PathBuf> {
        self.cache()
            .ok()
            .and_then(|cache| cache.recursive().tree(self))
            .map(|tree| tree.watched_paths())
            .unwrap_or_default()
    }
}
