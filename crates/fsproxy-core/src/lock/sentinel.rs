//! On-disk sentinel files for escalated locks.
//!
//! A sentinel sits beside the locked file, named `<prefix><leaf><suffix>`
//! (`.LCKreport.txt~` by default). Its only content is the absolute path of
//! the claimant, so another process can tell who holds the lock.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::ProxyConfig;
use crate::naming::HiddenNames;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelNames {
    prefix: String,
    suffix: String,
}

impl SentinelNames {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(&config.sentinel_prefix, &config.sentinel_suffix)
    }

    /// Sentinel path guarding `path`; `None` for a filesystem root.
    pub fn sentinel_for(&self, path: &Path) -> Option<PathBuf> {
        let parent = path.parent()?;
        let leaf = path.file_name()?.to_string_lossy();
        Some(parent.join(format!("{}{leaf}{}", self.prefix, self.suffix)))
    }

    /// Names the children listing must skip.
    pub fn hidden(&self) -> HiddenNames {
        HiddenNames::new(&self.prefix, &self.suffix)
    }

    /// Create `sentinel`, failing with `AlreadyExists` if it is present.
    pub fn write_claim(&self, sentinel: &Path, claimant: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(sentinel)?;
        file.write_all(claimant.to_string_lossy().as_bytes())?;
        file.sync_all()
    }

    /// Replace the claim of an existing sentinel.
    pub fn rewrite_claim(&self, sentinel: &Path, claimant: &Path) -> io::Result<()> {
        fs::write(sentinel, claimant.to_string_lossy().as_bytes())
    }

    /// Read the claimant recorded in `sentinel`, if the sentinel exists.
    pub fn read_claim(&self, sentinel: &Path) -> io::Result<Option<PathBuf>> {
        match fs::read_to_string(sentinel) {
            Ok(content) => Ok(Some(PathBuf::from(content.trim_end()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete `sentinel`; a sentinel that is already gone is not an error.
    pub fn remove(&self, sentinel: &Path) -> io::Result<()> {
        match fs::remove_file(sentinel) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Default for SentinelNames {
    fn default() -> Self {
        Self::new(".LCK", "~")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_name() {
        let names = SentinelNames::default();
        assert_eq!(
            names.sentinel_for(Path::new("/data/Foo.txt")).unwrap(),
            PathBuf::from("/data/.LCKFoo.txt~")
        );
        assert!(names.sentinel_for(Path::new("/")).is_none());
        assert!(names.hidden().is_hidden(".LCKFoo.txt~"));
    }

    #[test]
    fn test_claim_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let names = SentinelNames::default();
        let target = dir.path().join("a.txt");
        let sentinel = names.sentinel_for(&target).unwrap();

        assert_eq!(names.read_claim(&sentinel).unwrap(), None);
        names.write_claim(&sentinel, &target).unwrap();
        assert_eq!(names.read_claim(&sentinel).unwrap(), Some(target.clone()));

        let err = names.write_claim(&sentinel, &target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        names.remove(&sentinel).unwrap();
        names.remove(&sentinel).unwrap();
        assert!(!sentinel.exists());
    }
}
