// File: orchestrator/src/orchestrator/clock.rs
//
// Clock Abstraction
//
// Waiters and readiness checks read time and sleep through this trait so that
// tests can drive them under paused tokio time instead of real wall-clock time.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Time source used by every polling loop in the orchestrator.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use devstack_orchestrator::orchestrator::{Clock, SystemClock};
///
/// #[tokio::main]
/// async fn main() {
///     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///     let start = clock.now();
///     clock.sleep(Duration::from_millis(10)).await;
///     assert!(clock.now() - start >= Duration::from_millis(10));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real tokio time. Default for every waiter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Clock for runtimes started with `#[tokio::test(start_paused = true)]`.
///
/// Time only moves when every task is idle (auto-advance) or when
/// [`PausedClock::advance`] is called, so timeout tests finish instantly.
///
/// The runtime must already be paused; this type does not pause it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PausedClock;

impl PausedClock {
    /// Creates a handle on the paused runtime clock.
    pub fn new() -> Self {
        Self
    }

    /// Moves paused time forward by `d`, firing any timers that expire.
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}
