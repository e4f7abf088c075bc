use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{EventKind, ProxyNode};
use crate::error::{FsError, FsResult};
use crate::naming::{ChildChange, ChildrenIndex, EntryKind, is_absent, validate_leaf};

pub(crate) fn creation_event(kind: EntryKind) -> EventKind {
    match kind {
        EntryKind::Folder => EventKind::FolderCreated,
        _ => EventKind::DataCreated,
    }
}

impl ProxyNode {
    pub(crate) fn folder_index(&self) -> FsResult<&ChildrenIndex> {
        self.children_index()
            .ok_or_else(|| FsError::StructuralConflict {
                path: self.path(),
                expected: EntryKind::Folder,
                found: self.kind(),
            })
    }

    /// Create an empty subfolder.
    #[instrument(level = "debug", skip(self), fields(folder = %self.path().display()))]
    pub fn create_folder(&self, name: &str) -> FsResult<Arc<ProxyNode>> {
        self.create_child(name, EntryKind::Folder)
    }

    /// Create an empty file.
    #[instrument(level = "debug", skip(self), fields(folder = %self.path().display()))]
    pub fn create_data(&self, name: &str) -> FsResult<Arc<ProxyNode>> {
        self.create_child(name, EntryKind::File)
    }

    fn create_child(&self, name: &str, kind: EntryKind) -> FsResult<Arc<ProxyNode>> {
        self.ensure_valid()?;
        let index = self.folder_index()?;
        let cache = self.cache()?;
        validate_leaf(name, cache.hidden())?;

        let path = self.path().join(name);
        let created = match kind {
            EntryKind::Folder => fs::create_dir(&path),
            _ => OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map(drop),
        };
        match created {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(FsError::AlreadyExists { path });
            }
            Err(e) => return Err(FsError::io("create", &path, e)),
        }

        let identity = cache.namer().from_path(&path);
        index.insert(identity.clone(), kind);
        let node = cache.materialize(identity, kind);
        cache.fire(&node, creation_event(kind), true);
        debug!(path = %path.display(), %kind, "Created");
        Ok(node)
    }

    pub(crate) fn refresh_folder(self: &Arc<Self>, expected: bool) -> FsResult<()> {
        let cache = self.cache()?;
        let path = self.path();
        let index = self.folder_index()?;

        cache.metrics().record_stat();
        let still_folder = match fs::metadata(&path) {
            Ok(meta) => EntryKind::from_metadata(&meta) == EntryKind::Folder,
            Err(e) if is_absent(&e) => false,
            Err(e) => return Err(FsError::io("stat", &path, e)),
        };
        if !still_folder {
            debug!(path = %path.display(), "Folder vanished");
            cache.invalidate_subtree_with(&path, expected);
            return Ok(());
        }

        let before = index.recorded();
        let changes = index.refresh()?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut changes: Vec<_> = changes.into_iter().collect();
        changes.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        for (identity, change) in changes {
            match change {
                ChildChange::Added => {
                    let kind = index.kind_of(identity.name()).unwrap_or(EntryKind::File);
                    let node = cache.materialize(identity, kind);
                    cache.fire(&node, creation_event(kind), expected);
                }
                ChildChange::Removed => {
                    let kind = before.get(&identity).copied().unwrap_or(EntryKind::File);
                    cache.announce_removed(&identity, kind, expected);
                }
                ChildChange::Replaced => {
                    let old_kind = before.get(&identity).copied().unwrap_or(EntryKind::File);
                    cache.announce_removed(&identity, old_kind, expected);
                    let kind = index.kind_of(identity.name()).unwrap_or(EntryKind::File);
                    let node = cache.materialize(identity, kind);
                    cache.fire(&node, creation_event(kind), expected);
                }
            }
        }
        Ok(())
    }
}
