use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::identity::{Identity, key_is_descendant};
use super::{NameEquality, normalize_path};
use crate::error::{FsError, FsResult};

/// Resolves native paths to stable [`Identity`] values.
///
/// Implementations must be idempotent: resolving the same path twice returns
/// equal identities until the entry is explicitly relocated or forgotten.
pub trait IdentityNamer: Send + Sync + fmt::Debug {
    /// The name-equality rule used to build keys.
    fn equality(&self) -> NameEquality;

    /// Resolve `path`, registering it (and its ancestors) on first use.
    fn from_path(&self, path: &Path) -> Identity;

    /// Resolve `path` only if it is already registered.
    fn lookup(&self, path: &Path) -> Option<Identity>;

    /// Re-key `old` and every registered descendant to live under `new_path`.
    ///
    /// Returns `(old, new)` pairs ordered parents before children, with
    /// `old` itself first.
    fn relocate(&self, old: &Identity, new_path: &Path) -> FsResult<Vec<(Identity, Identity)>>;

    /// Rename `old` within its parent.
    fn rename(&self, old: &Identity, new_leaf: &str) -> FsResult<Vec<(Identity, Identity)>> {
        let parent = old
            .native_path()
            .parent()
            .map_or_else(|| PathBuf::from(new_leaf), |p| p.join(new_leaf));
        self.relocate(old, &parent)
    }

    /// Adopt the on-disk spelling of a name that matched under the equality rule.
    fn reconcile_case(&self, identity: &Identity, on_disk_name: &str) -> Identity;

    /// Drop `identity` and everything registered below it.
    fn forget(&self, identity: &Identity);
}

/// Default namer backed by a concurrent map of normalized path keys.
pub struct NativeNamer {
    equality: NameEquality,
    entries: DashMap<String, Identity>,
    next_serial: AtomicU64,
    /// Serializes relocations so descendant remaps never interleave.
    relocation: Mutex<()>,
}

impl NativeNamer {
    pub fn new(equality: NameEquality) -> Self {
        Self {
            equality,
            entries: DashMap::new(),
            next_serial: AtomicU64::new(1),
            relocation: Mutex::new(()),
        }
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_for(&self, normalized: &Path) -> String {
        self.equality.normalize(&normalized.to_string_lossy())
    }

    fn mint(&self, key: String, path: PathBuf, parent: Option<Identity>) -> Identity {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Identity::new(key, path, parent, serial)
    }

    fn resolve_normalized(&self, path: &Path) -> Identity {
        let key = self.key_for(path);
        if let Some(existing) = self.entries.get(&key) {
            return existing.clone();
        }

        // Parent first: no map guard may be held while recursing.
        let parent = path.parent().map(|p| self.resolve_normalized(p));

        self.entries
            .entry(key.clone())
            .or_insert_with(|| self.mint(key, path.to_path_buf(), parent))
            .clone()
    }
}

impl Default for NativeNamer {
    fn default() -> Self {
        Self::new(NameEquality::platform_default())
    }
}

impl fmt::Debug for NativeNamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeNamer")
            .field("equality", &self.equality)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Last `n` components of `path`.
fn tail_components(path: &Path, n: usize) -> PathBuf {
    let components: Vec<_> = path.components().collect();
    let start = components.len().saturating_sub(n);
    components[start..].iter().collect()
}

impl IdentityNamer for NativeNamer {
    fn equality(&self) -> NameEquality {
        self.equality
    }

    fn from_path(&self, path: &Path) -> Identity {
        self.resolve_normalized(&normalize_path(path))
    }

    fn lookup(&self, path: &Path) -> Option<Identity> {
        let key = self.key_for(&normalize_path(path));
        self.entries.get(&key).map(|e| e.clone())
    }

    fn relocate(&self, old: &Identity, new_path: &Path) -> FsResult<Vec<(Identity, Identity)>> {
        let _guard = self.relocation.lock();

        let new_path = normalize_path(new_path);
        let new_key = self.key_for(&new_path);
        let old_key = old.key().to_owned();

        if new_key != old_key
            && self.entries.contains_key(&new_key)
            && new_path.exists()
            && old.native_path().exists()
        {
            return Err(FsError::AlreadyExists { path: new_path });
        }

        let mut moved: Vec<Identity> = self
            .entries
            .iter()
            .filter(|e| *e.key() == old_key || key_is_descendant(&old_key, e.key()))
            .map(|e| e.value().clone())
            .collect();
        if !moved.iter().any(|id| id.key() == old_key) {
            moved.push(old.clone());
        }
        moved.sort_by_key(Identity::depth);

        // Stale registrations at the destination belong to entries that are gone.
        if new_key != old_key {
            self.entries.retain(|key, _| {
                !(*key == new_key || key_is_descendant(&new_key, key))
                    || *key == old_key
                    || key_is_descendant(&old_key, key)
            });
        }

        let base_depth = old.depth();
        let new_parent = new_path.parent().map(|p| self.resolve_normalized(p));
        let mut remapped: HashMap<String, Identity> = HashMap::with_capacity(moved.len());
        let mut pairs = Vec::with_capacity(moved.len());

        for id in &moved {
            let (path, parent) = if id.key() == old_key {
                (new_path.clone(), new_parent.clone())
            } else {
                let relative = tail_components(id.native_path(), id.depth() - base_depth);
                let path = new_path.join(relative);
                let parent = id
                    .parent()
                    .and_then(|p| remapped.get(p.key()).cloned())
                    .or_else(|| path.parent().map(|p| self.resolve_normalized(p)));
                (path, parent)
            };
            let key = self.key_for(&path);
            let fresh = self.mint(key.clone(), path, parent);
            remapped.insert(id.key().to_owned(), fresh.clone());
            pairs.push((id.clone(), fresh));
        }

        for (old_id, _) in &pairs {
            self.entries.remove(old_id.key());
        }
        for (_, new_id) in &pairs {
            self.entries.insert(new_id.key().to_owned(), new_id.clone());
        }

        debug!(
            from = %old.native_path().display(),
            to = %new_path.display(),
            remapped = pairs.len(),
            "Relocated identities"
        );
        Ok(pairs)
    }

    fn reconcile_case(&self, identity: &Identity, on_disk_name: &str) -> Identity {
        if identity.name() == on_disk_name {
            return identity.clone();
        }
        let Some(parent) = identity.parent() else {
            return identity.clone();
        };
        let path = parent.native_path().join(on_disk_name);
        let key = self.key_for(&path);
        if key != identity.key() {
            // Not a spelling variant of the same key: a different entry.
            return self.resolve_normalized(&path);
        }

        trace!(old = identity.name(), new = on_disk_name, "Reconciled name case");
        let fresh = self.mint(key.clone(), path, Some(parent.clone()));
        self.entries.insert(key, fresh.clone());
        fresh
    }

    fn forget(&self, identity: &Identity) {
        let key = identity.key();
        self.entries
            .retain(|k, _| k != key && !key_is_descendant(key, k));
    }
}
