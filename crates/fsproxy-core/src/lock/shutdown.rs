//! Release escalated locks when the process is told to terminate.
//!
//! Handles SIGINT, SIGTERM, and SIGHUP:
//! - First signal: force-releases every lock (removing sentinels), then exits
//! - Second signal: immediate exit, in case release hangs

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use signal_hook::SigId;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use tracing::{info, warn};

#[cfg(unix)]
use signal_hook::consts::signal::SIGHUP;

use super::{LockManager, ManagerInner};

/// Exit status used after a signal-triggered release.
const SIGNAL_EXIT_CODE: i32 = 130;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Registered signal handlers plus their monitor thread.
///
/// Dropping the hook unregisters the handlers. The hook never keeps the
/// manager alive.
pub struct ShutdownHook {
    manager: Weak<ManagerInner>,
    signaled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    ids: Vec<SigId>,
    monitor: Option<JoinHandle<()>>,
}

fn release_once(manager: &Weak<ManagerInner>, fired: &AtomicBool) -> usize {
    if fired.swap(true, Ordering::SeqCst) {
        return 0;
    }
    LockManager::upgrade(manager).map_or(0, |m| m.force_release_all())
}

/// Install termination handlers that force-release `manager`'s locks.
pub fn install_shutdown_hook(manager: &LockManager) -> io::Result<ShutdownHook> {
    let signaled = Arc::new(AtomicBool::new(false));
    let mut ids = Vec::new();

    for &sig in TERM_SIGNALS {
        // Second signal terminates immediately if shutdown already requested
        ids.push(flag::register_conditional_shutdown(
            sig,
            1,
            Arc::clone(&signaled),
        )?);
        ids.push(flag::register(sig, Arc::clone(&signaled))?);
    }

    #[cfg(unix)]
    {
        ids.push(flag::register_conditional_shutdown(
            SIGHUP,
            1,
            Arc::clone(&signaled),
        )?);
        ids.push(flag::register(SIGHUP, Arc::clone(&signaled))?);
    }

    let weak = manager.downgrade();
    let stop = Arc::new(AtomicBool::new(false));
    let fired = Arc::new(AtomicBool::new(false));

    let monitor = {
        let weak = weak.clone();
        let signaled = Arc::clone(&signaled);
        let stop = Arc::clone(&stop);
        let fired = Arc::clone(&fired);
        thread::Builder::new()
            .name("fsproxy-shutdown".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if signaled.load(Ordering::Relaxed) {
                        let removed = release_once(&weak, &fired);
                        info!(removed, "Termination signal received, locks released");
                        std::process::exit(SIGNAL_EXIT_CODE);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            })?
    };

    Ok(ShutdownHook {
        manager: weak,
        signaled,
        stop,
        fired,
        ids,
        monitor: Some(monitor),
    })
}

impl ShutdownHook {
    /// Run the release immediately, as a signal would, without exiting.
    ///
    /// Returns the number of sentinels removed; later calls return 0.
    pub fn run_now(&self) -> usize {
        release_once(&self.manager, &self.fired)
    }

    /// True once a termination signal has been observed.
    pub fn signaled(&self) -> bool {
        self.signaled.load(Ordering::Relaxed)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.monitor.take()
            && handle.join().is_err()
        {
            warn!("Shutdown monitor thread panicked");
        }
    }
}
