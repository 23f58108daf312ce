//! Cooperative cancellation shared by the watcher, the aggregator and the
//! controller.
//!
//! A [`ShutdownSignal`] is cheap to clone; every clone observes the same
//! state. The first call to [`ShutdownSignal::request`] wins and records its
//! [`ShutdownReason`]; later calls are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The operator typed the quit token.
    QuitToken,
    /// Ctrl+C.
    Interrupt,
    /// Control input closed or failed.
    ConsoleClosed(String),
    /// The watcher thread hit an unrecoverable error.
    WatcherFailed(String),
    /// Requested programmatically, e.g. by `Collector::stop`.
    UserRequest,
}

#[derive(Debug, Default)]
struct Inner {
    running_down: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
    wake: Condvar,
}

/// Shared stop request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` if this call initiated it.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        let mut slot = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        debug!("shutdown requested: {:?}", reason);
        *slot = Some(reason);
        self.inner.running_down.store(true, Ordering::Release);
        self.inner.wake.notify_all();
        true
    }

    pub fn is_requested(&self) -> bool {
        self.inner.running_down.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sleep for up to `timeout`, returning early if shutdown is requested.
    ///
    /// Returns `true` when shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .inner
                .wake
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_request_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());
        assert!(signal.request(ShutdownReason::QuitToken));
        assert!(!signal.request(ShutdownReason::Interrupt));
        assert!(signal.is_requested());
        assert_eq!(signal.reason(), Some(ShutdownReason::QuitToken));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_wakes_on_request() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || remote.wait_timeout(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        signal.request(ShutdownReason::UserRequest);

        let start = Instant::now();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
