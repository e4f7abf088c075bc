use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stable key for a native path.
///
/// Cheap to clone. Two identities compare equal iff their normalized keys
/// are equal, so an identity minted before a case-only rename still matches
/// the renamed entry under case-insensitive equality.
#[derive(Clone)]
pub struct Identity(Arc<Inner>);

struct Inner {
    key: String,
    path: PathBuf,
    name: String,
    parent: Option<Identity>,
    serial: u64,
}

impl Identity {
    pub(crate) fn new(
        key: String,
        path: PathBuf,
        parent: Option<Identity>,
        serial: u64,
    ) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Identity(Arc::new(Inner {
            key,
            path,
            name,
            parent,
            serial,
        }))
    }

    /// Normalized comparison key.
    pub fn key(&self) -> &str {
        &self.0.key
    }

    /// Native path with its on-disk spelling.
    pub fn native_path(&self) -> &Path {
        &self.0.path
    }

    /// Leaf name; empty for a filesystem root.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Identity> {
        self.0.parent.as_ref()
    }

    /// Registration counter; a remapped identity gets a fresh serial.
    pub fn serial(&self) -> u64 {
        self.0.serial
    }

    /// Number of path components below the filesystem root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(p) = cursor {
            depth += 1;
            cursor = p.parent();
        }
        depth
    }

    /// True if `other` lies strictly below `self`.
    pub fn is_ancestor_of(&self, other: &Identity) -> bool {
        key_is_descendant(self.key(), other.key())
    }

    /// True if `other` is `self` or lies below it.
    pub fn contains(&self, other: &Identity) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

/// True if `child` is strictly below `ancestor`, comparing normalized keys.
pub(crate) fn key_is_descendant(ancestor: &str, child: &str) -> bool {
    if child.len() <= ancestor.len() || !child.starts_with(ancestor) {
        return false;
    }
    // "/a/b" is below "/a" but "/ab" is not; the root key already ends with a separator.
    ancestor.ends_with(std::path::MAIN_SEPARATOR)
        || child[ancestor.len()..].starts_with(std::path::MAIN_SEPARATOR)
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.key == other.0.key
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("path", &self.0.path)
            .field("serial", &self.0.serial)
            .finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.path.display())
    }
}
