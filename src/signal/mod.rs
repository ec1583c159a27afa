//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal the shutdown flag is raised. Long-running work checks
//! it at safe points (between WorkUnitDirectories) and returns normally, so
//! the janitor lock is released and its file removed on the way out.
//!
//! On a second signal the process exits immediately. The kernel drops the
//! flock with the process; the stale lock file does not block the next run.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Exit code for interrupted runs
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// What to do in response to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop at the next safe point
    RequestShutdown,
    /// Second signal: exit now
    ImmediateExit,
    /// Further signals are ignored
    Ignore,
}

/// Shared shutdown flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
    signal_count: Arc<AtomicU8>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Raise the flag without a signal
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Handle a signal (SIGINT/SIGTERM)
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.request();
                SignalAction::RequestShutdown
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }

    /// Install process-wide SIGINT/SIGTERM handling bound to this flag.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || match signal.handle_signal() {
            SignalAction::RequestShutdown => {
                warn!("shutdown requested, finishing current work unit (signal again to exit now)");
            }
            SignalAction::ImmediateExit => {
                warn!("second signal, exiting immediately");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}
