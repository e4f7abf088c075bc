//! Error types for proxy operations.
//!
//! Native I/O failures are wrapped together with an [`OpContext`] describing
//! the offending path and whether its parent still existed when the failure
//! was observed. The remaining variants describe protocol failures (locks,
//! stream tickets, invalidated proxies) that never touched the disk.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::naming::EntryKind;
use crate::stream::TicketMode;

/// Context for native operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// The path the operation was applied to
    pub path: Option<PathBuf>,
    /// Destination path for rename, move and copy
    pub target: Option<PathBuf>,
    /// Whether the parent of `path` existed when the failure was observed
    pub parent_exists: Option<bool>,
}

impl OpContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Stat the parent of `path` and record whether it exists.
    #[must_use]
    pub fn probe_parent(mut self) -> Self {
        self.parent_exists = self
            .path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::exists);
        self
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref path) = self.path {
            parts.push(format!("at {:?}", path.display()));
        }
        if let Some(ref target) = self.target {
            parts.push(format!("to {:?}", target.display()));
        }
        match self.parent_exists {
            Some(true) => parts.push("parent exists".to_string()),
            Some(false) => parts.push("parent missing".to_string()),
            None => {}
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Core error type for the proxy layer.
#[derive(Error, Debug)]
pub enum FsError {
    /// A required path does not resolve to a supported entity.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Creation or rename target is already occupied.
    #[error("already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// An exclusivity lock was requested while another claimant holds it.
    #[error("{} is already locked by {}", path.display(), holder.display())]
    AlreadyLocked { path: PathBuf, holder: PathBuf },

    /// A stream ticket could not be obtained within the retry budget.
    #[error("{mode} stream access to {key} denied{}", describe_holders(.holders))]
    AccessDenied {
        key: String,
        mode: TicketMode,
        /// Diagnostic descriptions of the conflicting ticket holders.
        holders: Vec<String>,
    },

    /// The on-disk entity kind does not match what the caller expected.
    #[error("expected {expected} at {}, found {found}", path.display())]
    StructuralConflict {
        path: PathBuf,
        expected: EntryKind,
        found: EntryKind,
    },

    /// The proxy was invalidated and can no longer be used.
    #[error("proxy for {} is no longer valid", path.display())]
    InvalidProxy { path: PathBuf },

    /// The supplied lock does not protect the node being mutated.
    #[error("lock does not protect {}", path.display())]
    WrongLock { path: PathBuf },

    /// A child name is empty, contains a separator, or is reserved.
    #[error("invalid name {name:?}")]
    InvalidName { name: String },

    /// A move or copy destination is unusable.
    #[error("invalid target {}: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: &'static str },

    /// Native I/O failure with context.
    #[error("{op} failed {context}: {source}")]
    Io {
        op: &'static str,
        context: OpContext,
        #[source]
        source: io::Error,
    },
}

fn describe_holders(holders: &[String]) -> String {
    if holders.is_empty() {
        String::new()
    } else {
        format!("; held by:\n{}", holders.join("\n---\n"))
    }
}

impl FsError {
    /// Wrap a native I/O failure on `path`, probing the parent for context.
    #[must_use]
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        FsError::Io {
            op,
            context: OpContext::new().with_path(path).probe_parent(),
            source,
        }
    }

    /// Wrap a native I/O failure on a two-path operation.
    #[must_use]
    pub fn io_to(
        op: &'static str,
        path: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        FsError::Io {
            op,
            context: OpContext::new()
                .with_path(path)
                .with_target(target)
                .probe_parent(),
            source,
        }
    }

    /// Returns true for errors meaning "nothing is there".
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound { .. } => true,
            FsError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
