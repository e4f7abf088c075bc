use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::{EntryKind, HiddenNames, Identity, IdentityNamer, is_absent};
use crate::error::{FsError, FsResult};

/// Outcome of a rescan for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChange {
    Added,
    Removed,
    /// Still present, but its kind flipped (file <-> folder).
    Replaced,
}

#[derive(Debug, Clone)]
struct ChildEntry {
    identity: Identity,
    kind: EntryKind,
}

#[derive(Debug)]
struct IndexState {
    folder: Identity,
    /// Leaf key (normalized under the namer's equality) -> entry.
    entries: HashMap<String, ChildEntry>,
    /// True once a full directory listing has been recorded.
    complete: bool,
    /// Bumped by every single-entry update.
    generation: u64,
    /// Rescans currently listing the folder.
    scans: usize,
    /// Leaf key -> generation of its last single-entry update, kept only
    /// while a rescan is in flight.
    touched: HashMap<String, u64>,
}

impl IndexState {
    fn touch(&mut self, key: &str) {
        self.generation += 1;
        if self.scans > 0 {
            self.touched.insert(key.to_owned(), self.generation);
        }
    }
}

/// Cached child listing of one folder.
///
/// Only supported entries (files and folders) are recorded; lock sentinels
/// and other hidden names are skipped. Directory I/O happens outside the
/// index lock, the results are applied under it.
#[derive(Debug)]
pub struct ChildrenIndex {
    namer: Arc<dyn IdentityNamer>,
    hidden: HiddenNames,
    state: RwLock<IndexState>,
}

impl ChildrenIndex {
    pub fn new(folder: Identity, namer: Arc<dyn IdentityNamer>, hidden: HiddenNames) -> Self {
        Self {
            namer,
            hidden,
            state: RwLock::new(IndexState {
                folder,
                entries: HashMap::new(),
                complete: false,
                generation: 0,
                scans: 0,
                touched: HashMap::new(),
            }),
        }
    }

    pub fn folder(&self) -> Identity {
        self.state.read().folder.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state.read().complete
    }

    fn leaf_key(&self, name: &str) -> String {
        self.namer.equality().normalize(name)
    }

    /// List the folder on disk.
    fn scan(&self) -> FsResult<HashMap<String, ChildEntry>> {
        let folder = self.folder();
        let dir = folder.native_path();
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(e) if is_absent(&e) => return Ok(HashMap::new()),
            Err(e) => return Err(FsError::io("read_dir", dir, e)),
        };

        let mut found = HashMap::new();
        for entry in reader {
            let entry = entry.map_err(|e| FsError::io("read_dir", dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.hidden.is_hidden(&name) {
                continue;
            }
            let kind = match EntryKind::from_dir_entry(&entry) {
                Ok(Some(kind @ (EntryKind::File | EntryKind::Folder))) => kind,
                Ok(_) => continue,
                Err(e) => {
                    // Raced with a deletion, or a dangling link.
                    trace!(name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let mut identity = self.namer.from_path(&dir.join(&name));
            if identity.name() != name {
                identity = self.namer.reconcile_case(&identity, &name);
            }
            found.insert(self.leaf_key(&name), ChildEntry { identity, kind });
        }
        Ok(found)
    }

    /// All child identities, rescanning when forced or never listed.
    pub fn children(&self, force_rescan: bool) -> FsResult<Vec<Identity>> {
        if force_rescan || !self.is_complete() {
            self.refresh()?;
        }
        let state = self.state.read();
        Ok(state.entries.values().map(|e| e.identity.clone()).collect())
    }

    /// Children together with their recorded kinds.
    pub fn entries(&self, force_rescan: bool) -> FsResult<Vec<(Identity, EntryKind)>> {
        if force_rescan || !self.is_complete() {
            self.refresh()?;
        }
        let state = self.state.read();
        Ok(state
            .entries
            .values()
            .map(|e| (e.identity.clone(), e.kind))
            .collect())
    }

    /// Look up one child by name.
    ///
    /// Served from the listing when it is complete; otherwise (or when
    /// forced) the single child is stat'ed and the index corrected.
    pub fn child(&self, name: &str, force_rescan: bool) -> FsResult<Option<Identity>> {
        Ok(self.child_entry(name, force_rescan)?.map(|(id, _)| id))
    }

    pub fn child_entry(
        &self,
        name: &str,
        force_rescan: bool,
    ) -> FsResult<Option<(Identity, EntryKind)>> {
        let key = self.leaf_key(name);
        if !force_rescan {
            let state = self.state.read();
            if let Some(entry) = state.entries.get(&key) {
                return Ok(Some((entry.identity.clone(), entry.kind)));
            }
            if state.complete {
                return Ok(None);
            }
        }

        let path = self.folder().native_path().join(name);
        let kind = EntryKind::probe(&path).map_err(|e| FsError::io("stat", &path, e))?;
        let mut state = self.state.write();
        state.touch(&key);
        match kind {
            Some(kind @ (EntryKind::File | EntryKind::Folder)) if !self.hidden.is_hidden(name) => {
                let identity = self.namer.from_path(&path);
                state.entries.insert(
                    key,
                    ChildEntry {
                        identity: identity.clone(),
                        kind,
                    },
                );
                Ok(Some((identity, kind)))
            }
            _ => {
                state.entries.remove(&key);
                Ok(None)
            }
        }
    }

    /// Rescan and report what changed since the recorded listing.
    ///
    /// Entries inserted or removed while the listing was being read keep
    /// their recorded state instead of the listing's.
    pub fn refresh(&self) -> FsResult<HashMap<Identity, ChildChange>> {
        let started = self.begin_scan();
        let scanned = self.scan();
        self.finish_scan(started, scanned)
    }

    fn begin_scan(&self) -> u64 {
        let mut state = self.state.write();
        state.scans += 1;
        state.generation
    }

    fn finish_scan(
        &self,
        started: u64,
        scanned: FsResult<HashMap<String, ChildEntry>>,
    ) -> FsResult<HashMap<Identity, ChildChange>> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.scans -= 1;
        let mut found = match scanned {
            Ok(found) => found,
            Err(e) => {
                if state.scans == 0 {
                    state.touched.clear();
                }
                return Err(e);
            }
        };
        for (key, generation) in &state.touched {
            if *generation <= started {
                continue;
            }
            match state.entries.get(key) {
                Some(entry) => {
                    found.insert(key.clone(), entry.clone());
                }
                None => {
                    found.remove(key);
                }
            }
        }
        if state.scans == 0 {
            state.touched.clear();
        }

        let mut changes = HashMap::new();
        for (key, entry) in &found {
            match state.entries.get(key) {
                None => {
                    changes.insert(entry.identity.clone(), ChildChange::Added);
                }
                Some(old) if old.kind != entry.kind => {
                    changes.insert(entry.identity.clone(), ChildChange::Replaced);
                }
                Some(_) => {}
            }
        }
        for (key, old) in &state.entries {
            if !found.contains_key(key) {
                changes.insert(old.identity.clone(), ChildChange::Removed);
            }
        }

        state.entries = found;
        state.complete = true;
        if !changes.is_empty() {
            trace!(
                folder = %state.folder,
                changes = changes.len(),
                "Children changed on rescan"
            );
        }
        Ok(changes)
    }

    /// Record a child created through the proxy layer.
    pub fn insert(&self, identity: Identity, kind: EntryKind) {
        let key = self.leaf_key(identity.name());
        let mut state = self.state.write();
        state.touch(&key);
        state.entries.insert(key, ChildEntry { identity, kind });
    }

    /// Forget a child. Returns true if it was recorded.
    pub fn remove(&self, identity: &Identity) -> bool {
        let key = self.leaf_key(identity.name());
        let mut state = self.state.write();
        state.touch(&key);
        state.entries.remove(&key).is_some()
    }

    /// `Some(present)` when the answer is known, `None` when never listed and
    /// the name was never looked up.
    pub fn contains(&self, name: &str) -> Option<bool> {
        let key = self.leaf_key(name);
        let state = self.state.read();
        if state.entries.contains_key(&key) {
            Some(true)
        } else if state.complete {
            Some(false)
        } else {
            None
        }
    }

    /// The recorded listing, without I/O.
    pub fn recorded(&self) -> HashMap<Identity, EntryKind> {
        self.state
            .read()
            .entries
            .values()
            .map(|e| (e.identity.clone(), e.kind))
            .collect()
    }

    /// Recorded kind of a child, without I/O.
    pub fn kind_of(&self, name: &str) -> Option<EntryKind> {
        let key = self.leaf_key(name);
        self.state.read().entries.get(&key).map(|e| e.kind)
    }

    /// Re-point the index after its folder was renamed or moved.
    ///
    /// Child identities are re-resolved under the new folder path; the
    /// namer has already remapped them.
    pub fn set_folder(&self, folder: Identity) {
        let mut state = self.state.write();
        let base = folder.native_path().to_path_buf();
        for entry in state.entries.values_mut() {
            let name = entry.identity.name().to_owned();
            entry.identity = self.namer.from_path(&base.join(name));
        }
        state.folder = folder;
    }

    /// Drop the recorded listing; the next query rescans.
    pub fn clear(&self) {
        let mut state = self.state.write();
        trace!(folder = %state.folder, "Discarding children listing");
        state.entries.clear();
        state.complete = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{NameEquality, NativeNamer};

    fn index_for(dir: &std::path::Path) -> (Arc<NativeNamer>, ChildrenIndex) {
        let namer = Arc::new(NativeNamer::new(NameEquality::Exact));
        let folder = namer.from_path(dir);
        let index = ChildrenIndex::new(folder, namer.clone(), HiddenNames::new(".LCK", "~"));
        (namer, index)
    }

    #[test]
    fn test_contains_unknown_before_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (_namer, index) = index_for(dir.path());
        assert_eq!(index.contains("a"), None);
        index.children(false).unwrap();
        assert_eq!(index.contains("a"), Some(false));
    }

    #[test]
    fn test_refresh_reports_added_removed_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep"), b"").unwrap();
        fs::write(dir.path().join("gone"), b"").unwrap();
        fs::write(dir.path().join("flip"), b"").unwrap();
        let (_namer, index) = index_for(dir.path());
        assert_eq!(index.children(false).unwrap().len(), 3);

        fs::remove_file(dir.path().join("gone")).unwrap();
        fs::remove_file(dir.path().join("flip")).unwrap();
        fs::create_dir(dir.path().join("flip")).unwrap();
        fs::create_dir(dir.path().join("new")).unwrap();

        let changes = index.refresh().unwrap();
        let by_name: HashMap<_, _> = changes
            .iter()
            .map(|(id, change)| (id.name().to_owned(), *change))
            .collect();
        assert_eq!(by_name.len(), 3);
        assert_eq!(by_name["gone"], ChildChange::Removed);
        assert_eq!(by_name["flip"], ChildChange::Replaced);
        assert_eq!(by_name["new"], ChildChange::Added);
        assert_eq!(index.kind_of("flip"), Some(EntryKind::Folder));
    }

    #[test]
    fn test_insert_during_scan_survives_rescan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old"), b"").unwrap();
        let (namer, index) = index_for(dir.path());
        index.children(false).unwrap();

        let started = index.begin_scan();
        let scanned = index.scan();
        fs::write(dir.path().join("made"), b"").unwrap();
        index.insert(namer.from_path(&dir.path().join("made")), EntryKind::File);
        let changes = index.finish_scan(started, scanned).unwrap();

        assert!(changes.is_empty(), "unexpected changes {changes:?}");
        assert_eq!(index.kind_of("made"), Some(EntryKind::File));
        assert_eq!(index.state.read().touched.len(), 0);
    }

    #[test]
    fn test_remove_during_scan_is_not_readded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("doomed"), b"").unwrap();
        let (namer, index) = index_for(dir.path());
        index.children(false).unwrap();

        let started = index.begin_scan();
        let scanned = index.scan();
        fs::remove_file(dir.path().join("doomed")).unwrap();
        index.remove(&namer.from_path(&dir.path().join("doomed")));
        let changes = index.finish_scan(started, scanned).unwrap();

        assert!(changes.is_empty(), "unexpected changes {changes:?}");
        assert_eq!(index.contains("doomed"), Some(false));
    }

    #[test]
    fn test_sentinels_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();
        fs::write(dir.path().join(".LCKa.txt~"), b"/x").unwrap();
        let (_namer, index) = index_for(dir.path());
        let names: Vec<_> = index
            .children(true)
            .unwrap()
            .iter()
            .map(|id| id.name().to_owned())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_child_lookup_corrects_index() {
        let dir = tempfile::tempdir().unwrap();
        let (_namer, index) = index_for(dir.path());
        index.children(false).unwrap();

        fs::write(dir.path().join("late"), b"").unwrap();
        assert!(index.child("late", false).unwrap().is_none());
        assert!(index.child("late", true).unwrap().is_some());
        assert_eq!(index.contains("late"), Some(true));
    }

    #[test]
    fn test_missing_folder_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (_namer, index) = index_for(&dir.path().join("absent"));
        assert!(index.children(true).unwrap().is_empty());
    }
}
