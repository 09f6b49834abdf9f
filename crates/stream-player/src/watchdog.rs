//! Liveness watchdog for transports without per-read deadlines.
//!
//! The transport calls [`Watchdog::ping`] whenever bytes arrive and polls
//! [`Watchdog::is_stalled`] while it waits; a stall aborts the pending read
//! with `io::ErrorKind::TimedOut`.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default inactivity window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Watchdog {
    epoch: Instant,
    last_ping_ms: AtomicU64,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_ping_ms: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn shared(timeout: Duration) -> Arc<Self> {
        Arc::new(Self::new(timeout))
    }

    /// Record I/O activity.
    pub fn ping(&self) {
        self.last_ping_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// True once more than the timeout has elapsed since the last ping.
    pub fn is_stalled(&self) -> bool {
        self.idle_for() > self.timeout
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_ping_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// How a blocking I/O step is bounded.
#[derive(Clone, Debug)]
pub enum TimeoutPolicy {
    /// The transport never blocks past its own deadline.
    Native,
    /// The transport polls a watchdog while blocked.
    Watchdog(Arc<Watchdog>),
}

impl TimeoutPolicy {
    /// Run `op` under this policy.
    ///
    /// With a watchdog the clock is restarted before `op` and checked after
    /// it returns, so a step that only completed after the window still
    /// reports a timeout.
    pub fn with_timeout<T, E>(&self, op: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<io::Error>,
    {
        match self {
            TimeoutPolicy::Native => op(),
            TimeoutPolicy::Watchdog(w) => {
                w.ping();
                let out = op()?;
                if w.is_stalled() {
                    return Err(stalled_error(w.timeout()).into());
                }
                w.ping();
                Ok(out)
            }
        }
    }
}

pub(crate) fn stalled_error(timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no stream activity for {}s", timeout.as_secs()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_ping_is_not_stalled() {
        let w = Watchdog::new(Duration::from_millis(200));
        w.ping();
        assert!(!w.is_stalled());
    }

    #[test]
    fn stalls_after_timeout() {
        let w = Watchdog::new(Duration::from_millis(20));
        w.ping();
        thread::sleep(Duration::from_millis(60));
        assert!(w.is_stalled());
        w.ping();
        assert!(!w.is_stalled());
    }

    #[test]
    fn with_timeout_reports_slow_operation() {
        let policy = TimeoutPolicy::Watchdog(Watchdog::shared(Duration::from_millis(10)));
        let err = policy
            .with_timeout(|| -> io::Result<()> {
                thread::sleep(Duration::from_millis(40));
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn native_policy_passes_through() {
        let policy = TimeoutPolicy::Native;
        assert_eq!(policy.with_timeout(|| Ok::<_, io::Error>(7)).unwrap(), 7);
    }
}
