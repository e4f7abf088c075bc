//! Structural change events and listener bookkeeping.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;

use super::ProxyNode;

/// What happened to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    FolderCreated,
    DataCreated,
    Changed,
    Deleted,
    Renamed { old_path: PathBuf },
    Moved { old_path: PathBuf },
}

impl EventKind {
    pub fn is_creation(&self) -> bool {
        matches!(self, EventKind::FolderCreated | EventKind::DataCreated)
    }
}

/// One delivered notification.
///
/// The primary event of a change is delivered on the changed node (`file`
/// and `source` are the same). A correlated copy is delivered on the parent
/// folder with `source` set to the parent and `cause` pointing at the
/// primary event.
#[derive(Clone)]
pub struct NodeEvent {
    pub id: u64,
    pub kind: EventKind,
    /// The node that changed.
    pub file: Arc<ProxyNode>,
    /// The node whose listeners receive this event.
    pub source: Arc<ProxyNode>,
    /// Path of `file` when the event was fired.
    pub path: PathBuf,
    /// True when the change was made through this layer rather than
    /// discovered on disk.
    pub expected: bool,
    /// True for deletions implied by an ancestor's removal.
    pub cascaded: bool,
    pub time: SystemTime,
    pub cause: Option<Arc<NodeEvent>>,
}

impl NodeEvent {
    /// Id shared by a primary event and all of its correlated copies.
    pub fn logical_id(&self) -> u64 {
        self.cause.as_ref().map_or(self.id, |c| c.logical_id())
    }

    pub fn is_correlated(&self) -> bool {
        self.cause.is_some()
    }
}

impl fmt::Debug for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEvent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("source", &self.source.path())
            .field("expected", &self.expected)
            .field("cascaded", &self.cascaded)
            .field("cause", &self.cause.as_ref().map(|c| c.id))
            .finish()
    }
}

/// Receives [`NodeEvent`]s.
///
/// Called on the thread that made or discovered the change, never while a
/// cache or index lock is held.
pub trait NodeListener: Send + Sync {
    fn on_event(&self, event: &NodeEvent);
}

impl<F> NodeListener for F
where
    F: Fn(&NodeEvent) + Send + Sync,
{
    fn on_event(&self, event: &NodeEvent) {
        self(event);
    }
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
pub(crate) struct ListenerList {
    entries: RwLock<Vec<(ListenerId, Arc<dyn NodeListener>)>>,
}

impl ListenerList {
    pub(crate) fn add(&self, listener: Arc<dyn NodeListener>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver `event` to a snapshot of the registered listeners.
    pub(crate) fn notify(&self, event: &NodeEvent) {
        let snapshot: Vec<Arc<dyn NodeListener>> =
            self.entries.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener.on_event(event);
        }
    }
}

impl fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.len())
            .finish()
    }
}
