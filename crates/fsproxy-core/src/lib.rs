//! Identity-preserving proxy cache over the native filesystem.
//!
//! Callers mount a root folder in a [`ProxyRegistry`] (or build a single
//! [`ObjectCache`]) and resolve paths to [`ProxyNode`]s. A proxy keeps its
//! instance across renames and moves, shares one lock and one set of stream
//! tickets with every other route to the same file, and reports changes
//! through [`NodeListener`]s.
//!
//! ```no_run
//! use std::path::Path;
//! use fsproxy_core::{ProxyConfig, ProxyRegistry};
//!
//! # fn main() -> fsproxy_core::FsResult<()> {
//! let registry = ProxyRegistry::new(ProxyConfig::default());
//! let cache = registry.mount(Path::new("/srv/data"))?;
//! let report = cache.resolve(Path::new("/srv/data/report.txt"))?;
//!
//! let lock = report.lock()?;
//! report.rename(&lock, "report-final.txt")?;
//! assert!(report.path().ends_with("report-final.txt"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod listener;
pub mod lock;
pub mod metrics;
pub mod naming;
pub mod node;
pub mod registry;
pub mod stream;

pub use cache::{CancelFlag, ObjectCache, PreferredNext, RefreshOptions, RefreshReport};
pub use config::{ConfigError, ProxyConfig};
pub use error::{FsError, FsResult, OpContext};
pub use listener::ListenerTree;
pub use lock::{LockCapability, LockManager, ShutdownHook, install_shutdown_hook};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use naming::{EntryKind, Identity, IdentityNamer, NameEquality, NativeNamer};
pub use node::{
    CopyOptions, EventKind, ListenerId, NodeEvent, NodeListener, NodeReader, NodeWriter, ProxyNode,
};
pub use registry::ProxyRegistry;
pub use stream::{StreamArbiter, Ticket, TicketMode};
