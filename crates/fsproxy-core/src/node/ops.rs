use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use super::folder::creation_event;
use super::{EventKind, ProxyNode};
use crate::cache::{ObjectCache, RelocationGuard};
use crate::error::{FsError, FsResult};
use crate::lock::LockCapability;
use crate::naming::{EntryKind, Identity, NameEquality, validate_leaf};
use crate::stream::TicketMode;

/// Options for [`ProxyNode::copy_to`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Give copied files the modification time of their source.
    pub preserve_modified: bool,
}

impl CopyOptions {
    #[must_use]
    pub fn preserve_modified(mut self, preserve: bool) -> Self {
        self.preserve_modified = preserve;
        self
    }
}

fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn copy_file(src: &Path, dest: &Path, options: CopyOptions) -> FsResult<()> {
    fs::copy(src, dest).map_err(|e| FsError::io_to("copy", src, dest, e))?;
    if options.preserve_modified {
        let modified = fs::metadata(src)
            .and_then(|m| m.modified())
            .map_err(|e| FsError::io("stat", src, e))?;
        File::options()
            .write(true)
            .open(dest)
            .and_then(|f| f.set_modified(modified))
            .map_err(|e| FsError::io("set modified", dest, e))?;
    }
    Ok(())
}

impl ProxyNode {
    fn target_folder(target: &Arc<ProxyNode>) -> FsResult<()> {
        target.ensure_valid()?;
        if target.is_folder() {
            Ok(())
        } else {
            Err(FsError::StructuralConflict {
                path: target.path(),
                expected: EntryKind::Folder,
                found: target.kind(),
            })
        }
    }

    /// Delete the entry (recursively for folders).
    ///
    /// A folder cannot be deleted while a file below it is locked.
    #[instrument(level = "info", skip_all, fields(path = %self.path().display()))]
    pub fn delete(self: &Arc<Self>, lock: &LockCapability) -> FsResult<()> {
        self.ensure_valid()?;
        self.ensure_protected_by(lock)?;
        let cache = self.cache()?;
        let path = self.path();

        if self.is_folder()
            && let Some(held) = cache.locks().locked_under(&path).into_iter().next()
        {
            return Err(FsError::AlreadyLocked {
                path,
                holder: held,
            });
        }

        let removed = if self.is_folder() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| FsError::io("delete", &path, e))?;

        let count = cache.invalidate_subtree_with(&path, true);
        debug!(invalidated = count, "Deleted");
        Ok(())
    }

    /// Rename within the current parent folder.
    ///
    /// The proxy instance (and every cached descendant) survives with its
    /// new path. A case-only rename is allowed on case-insensitive
    /// filesystems.
    #[instrument(level = "info", skip(self, lock), fields(path = %self.path().display()))]
    pub fn rename(self: &Arc<Self>, lock: &LockCapability, new_name: &str) -> FsResult<()> {
        self.ensure_valid()?;
        self.ensure_protected_by(lock)?;
        let cache = self.cache()?;
        validate_leaf(new_name, cache.hidden())?;

        let identity = self.identity();
        if identity.name() == new_name {
            return Ok(());
        }
        let old_path = self.path();
        let parent = old_path.parent().ok_or_else(|| FsError::InvalidTarget {
            path: old_path.clone(),
            reason: "a filesystem root cannot be renamed",
        })?;
        let new_path = parent.join(new_name);

        let case_only = cache.namer().equality() == NameEquality::CaseInsensitive
            && NameEquality::CaseInsensitive.names_equal(identity.name(), new_name);
        if !case_only && entry_exists(&new_path) {
            return Err(FsError::AlreadyExists { path: new_path });
        }

        let relocation = cache.begin_relocation();
        fs::rename(&old_path, &new_path)
            .map_err(|e| FsError::io_to("rename", &old_path, &new_path, e))?;
        self.relocated(&cache, relocation, lock, &identity, &old_path, &new_path)?;

        cache.fire(
            self,
            EventKind::Renamed {
                old_path: old_path.clone(),
            },
            true,
        );
        Ok(())
    }

    /// Move into `target` under `new_name`.
    ///
    /// Returns the moved proxy: the same instance for an in-filesystem move,
    /// or the proxy of the copy when the move had to cross devices.
    #[instrument(level = "info", skip(self, lock, target), fields(path = %self.path().display(), target = %target.path().display()))]
    pub fn move_to(
        self: &Arc<Self>,
        lock: &LockCapability,
        target: &Arc<ProxyNode>,
        new_name: &str,
    ) -> FsResult<Arc<ProxyNode>> {
        self.ensure_valid()?;
        self.ensure_protected_by(lock)?;
        Self::target_folder(target)?;
        let cache = self.cache()?;
        validate_leaf(new_name, cache.hidden())?;

        let identity = self.identity();
        let old_path = self.path();
        let new_path = target.path().join(new_name);
        if new_path == old_path {
            return Ok(Arc::clone(self));
        }
        if self.is_folder() && new_path.starts_with(&old_path) {
            return Err(FsError::InvalidTarget {
                path: new_path,
                reason: "a folder cannot be moved into itself",
            });
        }
        if entry_exists(&new_path) {
            return Err(FsError::AlreadyExists { path: new_path });
        }

        let old_parent = self.parent();
        let relocation = cache.begin_relocation();
        match fs::rename(&old_path, &new_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                drop(relocation);
                debug!("Cross-device move, copying instead");
                let options = CopyOptions::default().preserve_modified(true);
                let copy = self.copy_to(target, new_name, options)?;
                self.delete(lock)?;
                return Ok(copy);
            }
            Err(e) => return Err(FsError::io_to("move", &old_path, &new_path, e)),
        }
        self.relocated(&cache, relocation, lock, &identity, &old_path, &new_path)?;

        let extra: Vec<Arc<ProxyNode>> = old_parent
            .into_iter()
            .filter(|p| !Arc::ptr_eq(p, target))
            .collect();
        cache.fire_with(
            self,
            EventKind::Moved {
                old_path: old_path.clone(),
            },
            true,
            &extra,
        );
        Ok(Arc::clone(self))
    }

    /// Bookkeeping shared by rename and move once the native rename succeeded.
    fn relocated(
        self: &Arc<Self>,
        cache: &ObjectCache,
        relocation: RelocationGuard<'_>,
        lock: &LockCapability,
        identity: &Identity,
        old_path: &Path,
        new_path: &Path,
    ) -> FsResult<()> {
        let pairs = match cache.remap(identity, new_path, relocation) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "Remap after rename failed, invalidating");
                cache.invalidate_subtree_with(old_path, false);
                self.mark_invalid();
                return Err(e);
            }
        };
        for (old, new) in &pairs {
            cache.streams().rekey(old.key(), new.key());
        }
        cache.locks().relocate(old_path, new_path);
        lock.follow(new_path);
        Ok(())
    }

    /// Copy into `target` under `new_name`, folders recursively.
    ///
    /// Every copied file is read under a shared ticket.
    #[instrument(level = "info", skip(self, target), fields(path = %self.path().display(), target = %target.path().display()))]
    pub fn copy_to(
        &self,
        target: &Arc<ProxyNode>,
        new_name: &str,
        options: CopyOptions,
    ) -> FsResult<Arc<ProxyNode>> {
        self.ensure_valid()?;
        Self::target_folder(target)?;
        let cache = self.cache()?;
        validate_leaf(new_name, cache.hidden())?;

        let src = self.path();
        let dest = target.path().join(new_name);
        if self.is_folder() && dest.starts_with(&src) {
            return Err(FsError::InvalidTarget {
                path: dest,
                reason: "a folder cannot be copied into itself",
            });
        }
        if entry_exists(&dest) {
            return Err(FsError::AlreadyExists { path: dest });
        }

        let kind = self.kind();
        if self.is_file() {
            let _ticket = cache
                .streams()
                .request(self.identity().key(), TicketMode::Shared)?;
            copy_file(&src, &dest, options)?;
        } else {
            self.copy_tree(&cache, &src, &dest, options)?;
        }

        let identity = cache.namer().from_path(&dest);
        target.folder_index()?.insert(identity.clone(), kind);
        let node = cache.materialize(identity, kind);
        cache.fire(&node, creation_event(kind), true);
        Ok(node)
    }

    fn copy_tree(
        &self,
        cache: &ObjectCache,
        src: &Path,
        dest: &Path,
        options: CopyOptions,
    ) -> FsResult<()> {
        let hidden = cache.hidden();
        let walker = WalkDir::new(src)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !hidden.is_hidden(&e.file_name().to_string_lossy()));
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| src.to_path_buf(), Path::to_path_buf);
                FsError::io("walk", path, io::Error::other(e))
            })?;
            let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
            let out: PathBuf = dest.join(relative);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                fs::create_dir_all(&out).map_err(|e| FsError::io("create", &out, e))?;
            } else if file_type.is_file() {
                let key = cache.namer().from_path(entry.path());
                let _ticket = cache.streams().request(key.key(), TicketMode::Shared)?;
                copy_file(entry.path(), &out, options)?;
            } else {
                debug!(path = %entry.path().display(), "Skipping non-regular entry in copy");
            }
        }
        Ok(())
    }
}
