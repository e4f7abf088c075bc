//! Shared/exclusive ticketing for open streams.
//!
//! A read stream holds a [`TicketMode::Shared`] ticket, a write stream a
//! [`TicketMode::Exclusive`] one. Any number of shared tickets may coexist on
//! a key; an exclusive ticket excludes every other ticket on that key.
//!
//! Requests that cannot be admitted wait on a condition variable for a
//! bounded number of fixed-length intervals, then fail with
//! [`FsError::AccessDenied`].

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::ProxyConfig;
use crate::error::{FsError, FsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketMode {
    Shared,
    Exclusive,
}

impl fmt::Display for TicketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketMode::Shared => write!(f, "shared"),
            TicketMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Debug)]
struct Holder {
    id: u64,
    description: String,
}

#[derive(Debug, Default)]
struct Slot {
    shared: Vec<Holder>,
    exclusive: Option<Holder>,
}

impl Slot {
    fn admits(&self, mode: TicketMode) -> bool {
        match mode {
            TicketMode::Shared => self.exclusive.is_none(),
            TicketMode::Exclusive => self.exclusive.is_none() && self.shared.is_empty(),
        }
    }

    fn is_empty(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }

    fn holds(&self, id: u64) -> bool {
        self.exclusive.as_ref().is_some_and(|h| h.id == id)
            || self.shared.iter().any(|h| h.id == id)
    }

    fn holders(&self) -> Vec<String> {
        self.exclusive
            .iter()
            .chain(self.shared.iter())
            .map(|h| h.description.clone())
            .collect()
    }
}

#[derive(Debug)]
struct ArbiterInner {
    slots: Mutex<HashMap<String, Slot>>,
    released: Condvar,
    attempts: u32,
    interval: Duration,
    diagnostics: bool,
    next_id: AtomicU64,
}

/// Arbitrates stream tickets per identity key.
///
/// Cheap to clone; clones share the same ticket table.
#[derive(Debug, Clone)]
pub struct StreamArbiter {
    inner: Arc<ArbiterInner>,
}

impl StreamArbiter {
    pub fn new(attempts: u32, interval: Duration, diagnostics: bool) -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                slots: Mutex::new(HashMap::new()),
                released: Condvar::new(),
                attempts,
                interval,
                diagnostics,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.stream_retry_attempts,
            config.stream_retry_interval,
            config.diagnostics,
        )
    }

    fn grant(
        &self,
        slots: &mut HashMap<String, Slot>,
        key: &str,
        mode: TicketMode,
        waited: bool,
    ) -> Ticket {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let current = thread::current();
        let mut description = format!(
            "{mode} ticket {id} held by thread {}",
            current.name().unwrap_or("<unnamed>")
        );
        if self.inner.diagnostics {
            description.push('\n');
            description.push_str(&Backtrace::force_capture().to_string());
        }

        let slot = slots.entry(key.to_owned()).or_default();
        let holder = Holder { id, description };
        match mode {
            TicketMode::Shared => slot.shared.push(holder),
            TicketMode::Exclusive => slot.exclusive = Some(holder),
        }
        trace!(key, %mode, id, "Granted stream ticket");

        Ticket {
            arbiter: Arc::downgrade(&self.inner),
            key: key.to_owned(),
            id,
            mode,
            waited,
            closed: AtomicBool::new(false),
        }
    }

    /// Request a ticket, waiting a bounded time for conflicting holders.
    pub fn request(&self, key: &str, mode: TicketMode) -> FsResult<Ticket> {
        let mut slots = self.inner.slots.lock();
        let admitted =
            |slots: &HashMap<String, Slot>| slots.get(key).is_none_or(|s| s.admits(mode));

        if admitted(&*slots) {
            return Ok(self.grant(&mut slots, key, mode, false));
        }

        for attempt in 1..=self.inner.attempts {
            let deadline = Instant::now() + self.inner.interval;
            loop {
                if admitted(&*slots) {
                    debug!(key, %mode, attempt, "Stream ticket granted after waiting");
                    return Ok(self.grant(&mut slots, key, mode, true));
                }
                if self
                    .inner
                    .released
                    .wait_until(&mut slots, deadline)
                    .timed_out()
                {
                    break;
                }
            }
        }

        if admitted(&*slots) {
            return Ok(self.grant(&mut slots, key, mode, true));
        }
        let holders = slots.get(key).map(Slot::holders).unwrap_or_default();
        debug!(key, %mode, holders = holders.len(), "Stream access denied");
        Err(FsError::AccessDenied {
            key: key.to_owned(),
            mode,
            holders,
        })
    }

    /// Request a ticket without waiting.
    pub fn try_request(&self, key: &str, mode: TicketMode) -> Option<Ticket> {
        let mut slots = self.inner.slots.lock();
        if slots.get(key).is_none_or(|s| s.admits(mode)) {
            Some(self.grant(&mut slots, key, mode, false))
        } else {
            None
        }
    }

    /// True while an exclusive ticket is outstanding on `key`.
    pub fn is_being_written(&self, key: &str) -> bool {
        self.inner
            .slots
            .lock()
            .get(key)
            .is_some_and(|s| s.exclusive.is_some())
    }

    /// Number of outstanding tickets on `key`.
    pub fn outstanding(&self, key: &str) -> usize {
        self.inner
            .slots
            .lock()
            .get(key)
            .map_or(0, |s| s.shared.len() + usize::from(s.exclusive.is_some()))
    }

    /// Move outstanding tickets from one key to another after a rename.
    ///
    /// Tickets keep their original key for release; the slot is re-keyed so
    /// new requests on the renamed entry see the existing holders.
    pub(crate) fn rekey(&self, old: &str, new: &str) {
        if old == new {
            return;
        }
        let mut slots = self.inner.slots.lock();
        if let Some(mut moved) = slots.remove(old) {
            let slot = slots.entry(new.to_owned()).or_default();
            if slot.exclusive.is_none() {
                slot.exclusive = moved.exclusive.take();
            }
            slot.shared.append(&mut moved.shared);
        }
    }
}

impl Default for StreamArbiter {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Permission to keep one stream open.
///
/// Released by [`Ticket::close`] or on drop; closing twice is harmless, as is
/// closing after the arbiter itself was dropped.
#[derive(Debug)]
pub struct Ticket {
    arbiter: Weak<ArbiterInner>,
    key: String,
    id: u64,
    mode: TicketMode,
    waited: bool,
    closed: AtomicBool,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> TicketMode {
        self.mode
    }

    /// True if the request had to wait for another holder.
    pub fn waited(&self) -> bool {
        self.waited
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.arbiter.upgrade() else {
            return;
        };

        let mut slots = inner.slots.lock();
        // The slot may have been re-keyed by a rename, and another entry may
        // since have taken the old key; find the holder by id.
        let key = if slots.get(&self.key).is_some_and(|s| s.holds(self.id)) {
            Some(self.key.clone())
        } else {
            slots
                .iter()
                .find(|(_, s)| s.holds(self.id))
                .map(|(k, _)| k.clone())
        };
        if let Some(key) = key
            && let Some(slot) = slots.get_mut(&key)
        {
            if slot.exclusive.as_ref().is_some_and(|h| h.id == self.id) {
                slot.exclusive = None;
            }
            slot.shared.retain(|h| h.id != self.id);
            if slot.is_empty() {
                slots.remove(&key);
            }
        }
        drop(slots);
        inner.released.notify_all();
        trace!(key = %self.key, id = self.id, "Released stream ticket");
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.close();
    }
}
