//! Stable path identities and per-folder child listings.
//!
//! - [`Identity`] - stable key for a native path, compared under a [`NameEquality`] rule
//! - [`IdentityNamer`] / [`NativeNamer`] - resolves paths to identities and remaps them on rename
//! - [`ChildrenIndex`] - per-folder cache of child identities with rescan diffing

mod children;
mod identity;
mod namer;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use children::{ChildChange, ChildrenIndex};
pub use identity::Identity;
pub(crate) use identity::key_is_descendant;
pub use namer::{IdentityNamer, NativeNamer};

/// Name-equality rule of the underlying filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameEquality {
    /// Names are equal only if byte-for-byte identical.
    Exact,
    /// Names differing only in letter case denote the same entity.
    CaseInsensitive,
}

impl NameEquality {
    /// Equality rule of the platform's default filesystem.
    pub fn platform_default() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            NameEquality::CaseInsensitive
        } else {
            NameEquality::Exact
        }
    }

    /// Normalize a name or path string into a comparison key.
    pub fn normalize(self, name: &str) -> String {
        match self {
            NameEquality::Exact => name.to_owned(),
            NameEquality::CaseInsensitive => name.to_lowercase(),
        }
    }

    pub fn names_equal(self, a: &str, b: &str) -> bool {
        match self {
            NameEquality::Exact => a == b,
            NameEquality::CaseInsensitive => a.to_lowercase() == b.to_lowercase(),
        }
    }
}

impl Default for NameEquality {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Kind of a native filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Folder,
    /// Sockets, fifos, devices: never proxied.
    Unsupported,
}

impl EntryKind {
    /// Stat `path` (following symlinks) and classify it.
    ///
    /// Returns `Ok(None)` when nothing exists at `path`.
    pub fn probe(path: &Path) -> io::Result<Option<EntryKind>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self::from_metadata(&meta))),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn from_metadata(meta: &fs::Metadata) -> EntryKind {
        let is_dir = meta.is_dir();
        let is_file = meta.is_file();
        debug_assert!(!(is_dir && is_file), "entry reports both file and folder");
        if is_dir {
            EntryKind::Folder
        } else if is_file {
            EntryKind::File
        } else {
            EntryKind::Unsupported
        }
    }

    /// Classify a directory entry, only stating it when it is a symlink.
    pub(crate) fn from_dir_entry(entry: &fs::DirEntry) -> io::Result<Option<EntryKind>> {
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            return Self::probe(&entry.path());
        }
        Ok(Some(if file_type.is_dir() {
            EntryKind::Folder
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Unsupported
        }))
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Folder => write!(f, "folder"),
            EntryKind::Unsupported => write!(f, "unsupported entry"),
        }
    }
}

/// Errors that mean the entry is simply not there.
pub(crate) fn is_absent(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Names that never surface as children (lock sentinels).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenNames {
    prefix: String,
    suffix: String,
}

impl HiddenNames {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        !self.prefix.is_empty()
            && name.len() > self.prefix.len() + self.suffix.len()
            && name.starts_with(&self.prefix)
            && name.ends_with(&self.suffix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

/// Make `path` absolute and lexically resolve `.` and `..` components.
///
/// Symlinks are not resolved: two spellings of a path through different
/// links remain different identities.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root keeps the root, as the OS does.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validate a single child name.
pub(crate) fn validate_leaf(name: &str, hidden: &HiddenNames) -> Result<(), crate::FsError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains(std::path::MAIN_SEPARATOR)
        || name.contains('\0')
        || hidden.is_hidden(name);
    if bad {
        Err(crate::FsError::InvalidName {
            name: name.to_owned(),
        })
    } else {
        Ok(())
    }
}
