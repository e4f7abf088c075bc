//! Exclusivity locks for mutating file operations.
//!
//! Every mutating call on a file proxy takes a [`LockCapability`] issued by a
//! [`LockManager`]. Locks are in-memory while their paths are unambiguous.
//! When two live locks name paths that collide under case-insensitive
//! comparison, each of them is escalated: a sentinel file is written beside
//! the locked file (see [`sentinel`]) so that other processes, and other
//! managers in this one, observe the claim.
//!
//! Folder proxies hand out lightweight capabilities that never touch the
//! manager.

pub mod sentinel;
pub mod shutdown;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{FsError, FsResult};
use crate::naming::normalize_path;

pub use sentinel::SentinelNames;
pub use shutdown::{ShutdownHook, install_shutdown_hook};

/// Notified after a lock is released.
pub trait LockObserver: Send + Sync {
    fn released(&self, path: &Path);
}

impl<F> LockObserver for F
where
    F: Fn(&Path) + Send + Sync,
{
    fn released(&self, path: &Path) {
        self(path);
    }
}

/// Two distinct paths naming the same entry on a case-insensitive filesystem.
fn paths_collide(a: &Path, b: &Path) -> bool {
    a != b && a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

#[derive(Debug)]
struct LockState {
    id: u64,
    path: Mutex<PathBuf>,
    sentinel: Mutex<Option<PathBuf>>,
    released: AtomicBool,
}

impl LockState {
    fn new(id: u64, path: PathBuf) -> Self {
        Self {
            id,
            path: Mutex::new(path),
            sentinel: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    fn is_escalated(&self) -> bool {
        self.sentinel.lock().is_some()
    }
}

struct ManagerInner {
    entries: Mutex<HashMap<PathBuf, Arc<LockState>>>,
    sentinels: SentinelNames,
    observers: RwLock<Vec<Arc<dyn LockObserver>>>,
    next_id: AtomicU64,
}

impl ManagerInner {
    /// Write a sentinel for `state`, failing if one is already on disk.
    fn escalate(&self, state: &LockState) -> FsResult<()> {
        if state.is_escalated() {
            return Ok(());
        }
        let path = state.path();
        let sentinel = self
            .sentinels
            .sentinel_for(&path)
            .ok_or_else(|| FsError::InvalidTarget {
                path: path.clone(),
                reason: "a filesystem root cannot be locked",
            })?;

        match self.sentinels.write_claim(&sentinel, &path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = self
                    .sentinels
                    .read_claim(&sentinel)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| sentinel.clone());
                return Err(FsError::AlreadyLocked { path, holder });
            }
            Err(e) => return Err(FsError::io("create sentinel", &sentinel, e)),
        }
        debug!(path = %path.display(), sentinel = %sentinel.display(), "Escalated lock");
        *state.sentinel.lock() = Some(sentinel);
        Ok(())
    }

    /// Delete the sentinel of `state`, if any.
    fn drop_sentinel(&self, state: &LockState) -> bool {
        let Some(sentinel) = state.sentinel.lock().take() else {
            return false;
        };
        if let Err(e) = self.sentinels.remove(&sentinel) {
            warn!(sentinel = %sentinel.display(), error = %e, "Failed to remove lock sentinel");
        }
        true
    }

    fn release(&self, state: &LockState) {
        if state.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let path = state.path();
        {
            let mut entries = self.entries.lock();
            if entries.get(&path).is_some_and(|s| s.id == state.id) {
                entries.remove(&path);
            }
        }
        self.drop_sentinel(state);
        debug!(path = %path.display(), "Released lock");

        let observers = self.observers.read().clone();
        for observer in observers {
            observer.released(&path);
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for state in entries.values() {
            state.released.store(true, Ordering::Release);
            self.drop_sentinel(state);
        }
    }
}

/// Issues and tracks [`LockCapability`] values.
///
/// Cheap to clone; clones share the same lock table. Dropping the last clone
/// removes every sentinel still on disk.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<ManagerInner>,
}

impl LockManager {
    pub fn new(sentinels: SentinelNames) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                entries: Mutex::new(HashMap::new()),
                sentinels,
                observers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn sentinels(&self) -> &SentinelNames {
        &self.inner.sentinels
    }

    pub fn add_observer(&self, observer: Arc<dyn LockObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Acquire the exclusivity lock for `path`.
    ///
    /// Fails with [`FsError::AlreadyLocked`] when this manager already holds
    /// `path`, when a sentinel for `path` exists on disk, or when two live
    /// locks already collide with `path` under case-insensitive comparison.
    /// A lock colliding with one live lock is escalated, along with that
    /// lock, before it is handed out.
    #[instrument(level = "debug", skip(self, path), fields(path = %path.display()))]
    pub fn acquire(&self, path: &Path) -> FsResult<LockCapability> {
        let path = normalize_path(path);
        let inner = &self.inner;
        let mut entries = inner.entries.lock();

        if entries.contains_key(&path) {
            return Err(FsError::AlreadyLocked {
                holder: path.clone(),
                path,
            });
        }

        let sentinel = inner
            .sentinels
            .sentinel_for(&path)
            .ok_or_else(|| FsError::InvalidTarget {
                path: path.clone(),
                reason: "a filesystem root cannot be locked",
            })?;
        if let Some(holder) = inner
            .sentinels
            .read_claim(&sentinel)
            .map_err(|e| FsError::io("read sentinel", &sentinel, e))?
        {
            let ours = entries.values().any(|s| s.path() == holder);
            if !ours {
                return Err(FsError::AlreadyLocked { path, holder });
            }
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(LockState::new(id, path.clone()));

        let colliding: Vec<Arc<LockState>> = entries
            .iter()
            .filter(|(held, _)| paths_collide(held, &path))
            .map(|(_, s)| Arc::clone(s))
            .collect();
        // A collision group is a pair at most; further spellings are refused.
        if colliding.len() >= 2 {
            let mut holders: Vec<PathBuf> = colliding.iter().map(|s| s.path()).collect();
            holders.sort();
            return Err(FsError::AlreadyLocked {
                path,
                holder: holders.swap_remove(0),
            });
        }
        if !colliding.is_empty() {
            inner.escalate(&state)?;
            for other in &colliding {
                if let Err(e) = inner.escalate(other) {
                    inner.drop_sentinel(&state);
                    return Err(e);
                }
            }
            info!(
                path = %path.display(),
                colliding = colliding.len(),
                "Name collision, locks escalated to sentinels"
            );
        }

        entries.insert(path, Arc::clone(&state));
        Ok(LockCapability {
            state,
            manager: Some(Arc::downgrade(inner)),
        })
    }

    /// Re-key locks at or below `old` after a rename or move to `new`.
    ///
    /// Sentinels follow their files: the sentinel of a renamed file is
    /// renamed beside it, and every moved sentinel's claim is rewritten.
    pub fn relocate(&self, old: &Path, new: &Path) {
        let old = normalize_path(old);
        let new = normalize_path(new);
        let inner = &self.inner;
        let mut entries = inner.entries.lock();

        let affected: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.starts_with(&old))
            .cloned()
            .collect();

        for held in affected {
            let Some(state) = entries.remove(&held) else {
                continue;
            };
            let Ok(suffix) = held.strip_prefix(&old) else {
                continue;
            };
            let moved = if suffix.as_os_str().is_empty() {
                new.clone()
            } else {
                new.join(suffix)
            };

            let mut sentinel = state.sentinel.lock();
            if let Some(current) = sentinel.as_ref() {
                // Nested sentinels already moved with their folder.
                let on_disk = if held == old {
                    current.clone()
                } else {
                    inner
                        .sentinels
                        .sentinel_for(&moved)
                        .unwrap_or_else(|| current.clone())
                };
                if let Some(target) = inner.sentinels.sentinel_for(&moved) {
                    if on_disk != target
                        && let Err(e) = std::fs::rename(&on_disk, &target)
                    {
                        warn!(from = %on_disk.display(), to = %target.display(), error = %e, "Failed to move lock sentinel");
                    }
                    if let Err(e) = inner.sentinels.rewrite_claim(&target, &moved) {
                        warn!(sentinel = %target.display(), error = %e, "Failed to rewrite lock sentinel");
                    }
                    *sentinel = Some(target);
                }
            }
            drop(sentinel);

            debug!(from = %held.display(), to = %moved.display(), "Relocated lock");
            *state.path.lock() = moved.clone();
            entries.insert(moved, state);
        }
    }

    /// Paths of live locks at or below `path`.
    pub fn locked_under(&self, path: &Path) -> Vec<PathBuf> {
        let path = normalize_path(path);
        self.inner
            .entries
            .lock()
            .keys()
            .filter(|p| p.starts_with(&path))
            .cloned()
            .collect()
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.inner.entries.lock().contains_key(&normalize_path(path))
    }

    /// Number of live locks.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every live lock, removing all sentinels. Returns how many
    /// sentinels were removed.
    pub fn force_release_all(&self) -> usize {
        let states: Vec<Arc<LockState>> = self.inner.entries.lock().values().cloned().collect();
        let mut removed = 0;
        for state in states {
            if state.is_escalated() {
                removed += 1;
            }
            self.inner.release(&state);
        }
        if removed > 0 {
            info!(removed, "Force-released escalated locks");
        }
        removed
    }

    fn downgrade(&self) -> Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<ManagerInner>) -> Option<LockManager> {
        weak.upgrade().map(|inner| LockManager { inner })
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(SentinelNames::default())
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("locks", &self.len())
            .field("sentinels", &self.inner.sentinels)
            .finish()
    }
}

/// Proof that the holder may mutate the entry at [`LockCapability::path`].
///
/// Released on drop.
pub struct LockCapability {
    state: Arc<LockState>,
    /// `None` for the lightweight capability handed out by folders.
    manager: Option<Weak<ManagerInner>>,
}

impl LockCapability {
    pub(crate) fn lightweight(path: &Path) -> Self {
        Self {
            state: Arc::new(LockState::new(0, normalize_path(path))),
            manager: None,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.state.path()
    }

    pub fn is_lightweight(&self) -> bool {
        self.manager.is_none()
    }

    /// True once a sentinel has been written for this lock.
    pub fn is_escalated(&self) -> bool {
        self.state.is_escalated()
    }

    pub fn sentinel_path(&self) -> Option<PathBuf> {
        self.state.sentinel.lock().clone()
    }

    pub fn is_valid(&self) -> bool {
        !self.state.released.load(Ordering::Acquire)
    }

    /// True if this capability is live and guards exactly `path`.
    pub fn protects(&self, path: &Path) -> bool {
        self.is_valid() && self.state.path() == normalize_path(path)
    }

    /// Re-point a lightweight capability after its folder moved.
    pub(crate) fn follow(&self, new_path: &Path) {
        if self.is_lightweight() {
            *self.state.path.lock() = normalize_path(new_path);
        }
    }

    /// Release the lock. Idempotent.
    pub fn release(&self) {
        match self.manager.as_ref().and_then(Weak::upgrade) {
            Some(inner) => inner.release(&self.state),
            None => self.state.released.store(true, Ordering::Release),
        }
    }
}

impl Drop for LockCapability {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LockCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCapability")
            .field("path", &self.path())
            .field("lightweight", &self.is_lightweight())
            .field("escalated", &self.is_escalated())
            .field("valid", &self.is_valid())
            .finish()
    }
}
