//! Bulk re-synchronization of cached proxies with the disk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::ObjectCache;
use crate::naming::normalize_path;
use crate::node::ProxyNode;

/// Shared flag that stops a running bulk refresh between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// The underlying flag, for wiring into signal handlers.
    pub fn as_atomic(&self) -> &Arc<AtomicBool> {
        &self.0
    }
}

/// A path another thread wants refreshed before anything else.
///
/// The hint is consumed at the next batch boundary.
#[derive(Debug, Clone, Default)]
pub struct PreferredNext(Arc<Mutex<Option<PathBuf>>>);

impl PreferredNext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefer(&self, path: impl Into<PathBuf>) {
        *self.0.lock() = Some(path.into());
    }

    fn take(&self) -> Option<PathBuf> {
        self.0.lock().take()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Restrict the pass to these subtrees. Empty means the whole cache.
    pub roots: Vec<PathBuf>,
    /// Pause between batches in proportion to the time each batch took.
    pub throttled: bool,
    pub cancel: Option<CancelFlag>,
    pub preferred: Option<PreferredNext>,
    /// Copied into every event the pass fires.
    pub expected: bool,
}

impl RefreshOptions {
    #[must_use]
    pub fn under(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    #[must_use]
    pub fn throttled(mut self, throttled: bool) -> Self {
        self.throttled = throttled;
        self
    }

    #[must_use]
    pub fn cancel_with(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    #[must_use]
    pub fn prefer_with(mut self, preferred: PreferredNext) -> Self {
        self.preferred = Some(preferred);
        self
    }
}

/// Outcome of one bulk refresh pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Nodes refreshed.
    pub visited: usize,
    pub batches: usize,
    pub cancelled: bool,
    /// Total time spent sleeping for throttling.
    pub paused: Duration,
    /// Nodes whose refresh failed; the pass continues past them.
    pub errors: usize,
}

impl ObjectCache {
    /// Refresh every live proxy, shallowest first and then by path.
    ///
    /// Nodes invalidated by an earlier refresh in the same pass are skipped.
    #[instrument(level = "info", skip_all, fields(root = %self.root_path().display()))]
    pub fn bulk_refresh(&self, options: &RefreshOptions) -> RefreshReport {
        let mut queue: VecDeque<_> = {
            let mut nodes = self.live_nodes(&options.roots);
            nodes.sort_by_cached_key(|n| (n.identity().depth(), n.path()));
            nodes.into()
        };
        let batch_size = self.config().refresh_batch_size.max(1);
        let max_pause = self.config().refresh_max_pause;
        let load_factor = self.config().refresh_load_factor;
        let mut report = RefreshReport::default();

        while !queue.is_empty() {
            if options.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                info!(remaining = queue.len(), "Bulk refresh cancelled");
                report.cancelled = true;
                break;
            }
            if let Some(hint) = options.preferred.as_ref().and_then(PreferredNext::take) {
                self.promote(&mut queue, &hint);
            }

            let started = Instant::now();
            for node in queue.drain(..batch_size.min(queue.len())) {
                if !node.is_valid() {
                    continue;
                }
                report.visited += 1;
                if let Err(e) = node.refresh(options.expected) {
                    report.errors += 1;
                    warn!(path = %node.path().display(), error = %e, "Refresh failed");
                }
            }
            report.batches += 1;
            self.metrics().record_batch();

            if options.throttled && !queue.is_empty() {
                let pause = started.elapsed().mul_f64(load_factor).min(max_pause);
                if !pause.is_zero() {
                    thread::sleep(pause);
                    report.paused += pause;
                }
            }
        }

        debug!(
            visited = report.visited,
            batches = report.batches,
            errors = report.errors,
            "Bulk refresh finished"
        );
        report
    }

    fn promote(&self, queue: &mut VecDeque<Arc<ProxyNode>>, hint: &Path) {
        let hint = normalize_path(hint);
        if let Some(pos) = queue.iter().position(|n| n.path() == hint)
            && let Some(node) = queue.remove(pos)
        {
            queue.push_front(node);
        } else if let Ok(Some(node)) = self.find(&hint) {
            queue.push_front(node);
        }
    }
}
