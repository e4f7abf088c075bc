//! File and folder proxies.
//!
//! A [`ProxyNode`] is the long-lived object handed to callers for one native
//! entry. It is created by its [`ObjectCache`](crate::ObjectCache), keeps a
//! stable instance across renames and moves, and becomes permanently invalid
//! once the entry is found gone or replaced.
//!
//! # Operations
//!
//! - Streams: [`ProxyNode::open_read`], [`ProxyNode::open_write`]
//! - Structure: [`ProxyNode::create_folder`], [`ProxyNode::create_data`],
//!   [`ProxyNode::delete`], [`ProxyNode::rename`], [`ProxyNode::move_to`],
//!   [`ProxyNode::copy_to`]
//! - Consistency: [`ProxyNode::refresh`]
//!
//! Mutations take a [`LockCapability`] from [`ProxyNode::lock`], perform the
//! native I/O, update cache bookkeeping, and only then fire events.

mod event;
mod file;
mod folder;
mod ops;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::cache::{CacheInner, ObjectCache};
use crate::error::{FsError, FsResult};
use crate::lock::LockCapability;
use crate::naming::{ChildrenIndex, EntryKind, Identity};

pub use event::{EventKind, ListenerId, NodeEvent, NodeListener};
pub use file::{NodeReader, NodeWriter};
pub use ops::CopyOptions;

pub(crate) use event::ListenerList;

/// Cached attributes of a file proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStamp {
    pub(crate) modified: Option<SystemTime>,
    pub(crate) read_only: bool,
}

impl FileStamp {
    pub(crate) fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            read_only: meta.permissions().readonly(),
        }
    }

    fn read(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|m| Self::from_metadata(&m))
    }
}

enum NodeKind {
    File { stamp: Mutex<FileStamp> },
    Folder { children: ChildrenIndex },
}

pub struct ProxyNode {
    identity: RwLock<Identity>,
    valid: AtomicBool,
    kind: NodeKind,
    listeners: ListenerList,
    cache: Weak<CacheInner>,
}

impl ProxyNode {
    /// Build an unpublished node. File nodes stat their entry once.
    pub(crate) fn new(identity: Identity, kind: EntryKind, cache: &Arc<CacheInner>) -> Arc<Self> {
        let kind = match kind {
            EntryKind::Folder => NodeKind::Folder {
                children: ChildrenIndex::new(
                    identity.clone(),
                    Arc::clone(cache.namer()),
                    cache.hidden().clone(),
                ),
            },
            EntryKind::File | EntryKind::Unsupported => {
                debug_assert!(kind == EntryKind::File, "unsupported entries are never proxied");
                cache.metrics().record_stat();
                let stamp = FileStamp::read(identity.native_path()).unwrap_or(FileStamp {
                    modified: None,
                    read_only: false,
                });
                NodeKind::File {
                    stamp: Mutex::new(stamp),
                }
            }
        };
        Arc::new(Self {
            identity: RwLock::new(identity),
            valid: AtomicBool::new(true),
            kind,
            listeners: ListenerList::default(),
            cache: Arc::downgrade(cache),
        })
    }

    /// An already-invalid stand-in for an entry that vanished before it was
    /// ever proxied, so its deletion can still be announced.
    pub(crate) fn detached(identity: Identity, kind: EntryKind, cache: &Arc<CacheInner>) -> Arc<Self> {
        let kind = match kind {
            EntryKind::Folder => NodeKind::Folder {
                children: ChildrenIndex::new(
                    identity.clone(),
                    Arc::clone(cache.namer()),
                    cache.hidden().clone(),
                ),
            },
            EntryKind::File | EntryKind::Unsupported => NodeKind::File {
                stamp: Mutex::new(FileStamp {
                    modified: None,
                    read_only: false,
                }),
            },
        };
        Arc::new(Self {
            identity: RwLock::new(identity),
            valid: AtomicBool::new(false),
            kind,
            listeners: ListenerList::default(),
            cache: Arc::downgrade(cache),
        })
    }

    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    pub fn path(&self) -> PathBuf {
        self.identity.read().native_path().to_path_buf()
    }

    pub fn name(&self) -> String {
        self.identity.read().name().to_owned()
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder { .. })
    }

    pub fn kind(&self) -> EntryKind {
        match self.kind {
            NodeKind::File { .. } => EntryKind::File,
            NodeKind::Folder { .. } => EntryKind::Folder,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Cached modification time; `None` for folders.
    pub fn last_modified(&self) -> Option<SystemTime> {
        match &self.kind {
            NodeKind::File { stamp } => stamp.lock().modified,
            NodeKind::Folder { .. } => None,
        }
    }

    /// Cached read-only flag; folders are never read-only here.
    pub fn is_read_only(&self) -> bool {
        match &self.kind {
            NodeKind::File { stamp } => stamp.lock().read_only,
            NodeKind::Folder { .. } => false,
        }
    }

    /// Size in bytes, read from disk.
    pub fn size(&self) -> FsResult<u64> {
        self.ensure_valid()?;
        let path = self.path();
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| FsError::io("stat", path, e))
    }

    /// The containing folder, if it lies inside the same cache.
    pub fn parent(&self) -> Option<Arc<ProxyNode>> {
        let cache = self.cache().ok()?;
        let identity = self.identity();
        if identity == *cache.root_identity() {
            return None;
        }
        let parent = identity.parent()?;
        if !cache.root_identity().contains(parent) {
            return None;
        }
        Some(cache.materialize(parent.clone(), EntryKind::Folder))
    }

    /// Children of a folder, listed once and then served from the index.
    /// Files have no children.
    pub fn children(&self) -> FsResult<Vec<Arc<ProxyNode>>> {
        self.ensure_valid()?;
        let Some(index) = self.children_index() else {
            return Ok(Vec::new());
        };
        let cache = self.cache()?;
        let mut nodes: Vec<Arc<ProxyNode>> = index
            .entries(false)?
            .into_iter()
            .map(|(id, kind)| cache.materialize(id, kind))
            .collect();
        nodes.sort_by_key(|n| n.name());
        Ok(nodes)
    }

    /// Look up a child by name.
    pub fn child(&self, name: &str) -> FsResult<Option<Arc<ProxyNode>>> {
        self.ensure_valid()?;
        let Some(index) = self.children_index() else {
            return Ok(None);
        };
        let cache = self.cache()?;
        Ok(index
            .child_entry(name, false)?
            .map(|(id, kind)| cache.materialize(id, kind)))
    }

    /// Register a listener for events on this node.
    pub fn add_listener(&self, listener: Arc<dyn NodeListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Subscribe to changes anywhere below this folder.
    pub fn add_recursive_listener(
        self: &Arc<Self>,
        listener: Arc<dyn NodeListener>,
    ) -> FsResult<ListenerId> {
        self.cache()?.recursive().add(self, listener)
    }

    pub fn remove_recursive_listener(self: &Arc<Self>, id: ListenerId) -> bool {
        self.cache()
            .is_ok_and(|cache| cache.recursive().remove(self, id))
    }

    /// Obtain the capability required by mutating calls.
    ///
    /// Folders hand out a lightweight capability that is always available;
    /// files go through the lock manager and may be refused or escalated.
    pub fn lock(&self) -> FsResult<LockCapability> {
        self.ensure_valid()?;
        let path = self.path();
        match self.kind {
            NodeKind::Folder { .. } => Ok(LockCapability::lightweight(&path)),
            NodeKind::File { .. } => self.cache()?.locks().acquire(&path),
        }
    }

    /// Re-synchronize with the disk.
    ///
    /// Files compare their cached stamp; folders diff their children.
    /// `expected` is copied into any events this fires.
    pub fn refresh(self: &Arc<Self>, expected: bool) -> FsResult<()> {
        if !self.is_valid() {
            return Ok(());
        }
        match self.kind {
            NodeKind::File { .. } => self.refresh_file(expected),
            NodeKind::Folder { .. } => self.refresh_folder(expected),
        }
    }

    // --- crate internals ---

    pub(crate) fn cache(&self) -> FsResult<ObjectCache> {
        ObjectCache::upgrade(&self.cache).ok_or_else(|| FsError::InvalidProxy { path: self.path() })
    }

    pub(crate) fn ensure_valid(&self) -> FsResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(FsError::InvalidProxy { path: self.path() })
        }
    }

    pub(crate) fn ensure_protected_by(&self, lock: &LockCapability) -> FsResult<()> {
        let path = self.path();
        if lock.protects(&path) {
            Ok(())
        } else {
            Err(FsError::WrongLock { path })
        }
    }

    pub(crate) fn children_index(&self) -> Option<&ChildrenIndex> {
        match &self.kind {
            NodeKind::Folder { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    pub(crate) fn listeners(&self) -> &ListenerList {
        &self.listeners
    }

    /// Swap in a remapped identity. Folders re-point their index.
    pub(crate) fn set_identity(&self, identity: Identity) {
        if let NodeKind::Folder { children } = &self.kind {
            children.set_folder(identity.clone());
        }
        *self.identity.write() = identity;
    }

    /// Move to the terminal invalid state. Returns false if already invalid.
    pub(crate) fn mark_invalid(&self) -> bool {
        let was_valid = self.valid.swap(false, Ordering::AcqRel);
        if was_valid {
            trace!(path = %self.path().display(), "Invalidated proxy");
        }
        was_valid
    }

    /// Replace the cached stamp, returning the previous one for files.
    pub(crate) fn swap_stamp(&self, new: FileStamp) -> Option<FileStamp> {
        match &self.kind {
            NodeKind::File { stamp } => Some(std::mem::replace(&mut *stamp.lock(), new)),
            NodeKind::Folder { .. } => None,
        }
    }

    /// Address used to key per-node bookkeeping.
    pub(crate) fn addr(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

impl fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyNode")
            .field("path", &self.path())
            .field("kind", &self.kind())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.path().display())
    }
}
