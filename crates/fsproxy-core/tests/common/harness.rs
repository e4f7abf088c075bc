//! Test harness for fsproxy integration tests.
//!
//! Provides a `TestRoot` that owns a temporary folder mounted in its own
//! `ProxyRegistry`, plus an `EventLog` listener that records every event it
//! receives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fsproxy_core::{
    EventKind, NameEquality, NodeEvent, NodeListener, ObjectCache, ProxyConfig, ProxyNode,
    ProxyRegistry,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route core logs to the test writer. `RUST_LOG=fsproxy_core=trace` for detail.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

/// Configuration with short stream waits so contention tests fail fast.
pub fn fast_config() -> ProxyConfig {
    ProxyConfig::default()
        .with_name_equality(NameEquality::Exact)
        .with_stream_retry(3, Duration::from_millis(10))
}

/// Temporary folder mounted as a cache root.
pub struct TestRoot {
    pub registry: ProxyRegistry,
    pub cache: ObjectCache,
    dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ProxyConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let registry = ProxyRegistry::new(config);
        let cache = registry.mount(dir.path()).expect("Failed to mount temp dir");
        Self {
            registry,
            cache,
            dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Create a file behind the cache's back, with parents.
    pub fn write(&self, relative: &str, content: &[u8]) {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parents");
        }
        fs::write(&path, content).expect("Failed to write file");
    }

    /// Create a folder behind the cache's back, with parents.
    pub fn mkdir(&self, relative: &str) {
        fs::create_dir_all(self.join(relative)).expect("Failed to create folder");
    }

    pub fn resolve(&self, relative: &str) -> Arc<ProxyNode> {
        self.cache
            .resolve(&self.join(relative))
            .unwrap_or_else(|e| panic!("Failed to resolve {relative}: {e}"))
    }

    pub fn root(&self) -> Arc<ProxyNode> {
        self.cache.root()
    }
}

/// Listener that records every event it is handed.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<NodeEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Events of one kind, ignoring payloads such as `old_path`.
    pub fn of_kind(&self, kind: &EventKind) -> Vec<NodeEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| std::mem::discriminant(&e.kind) == std::mem::discriminant(kind))
            .cloned()
            .collect()
    }

    /// Paths of recorded events, in delivery order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.events.lock().iter().map(|e| e.path.clone()).collect()
    }
}

impl NodeListener for EventLog {
    fn on_event(&self, event: &NodeEvent) {
        self.events.lock().push(event.clone());
    }
}
