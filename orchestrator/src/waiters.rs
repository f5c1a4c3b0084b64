// File: orchestrator/src/waiters.rs
//
// Waiter Primitives
//
// Every "wait until a fact becomes true" in the stack goes through wait_for:
// process readiness checks, on-chain registration checks, cluster key
// propagation. Only falsy results are retried; errors from the condition
// propagate on the first occurrence.

use crate::error::{StackError, StackResult};
use crate::orchestrator::{Clock, SystemClock};
use log::{debug, info};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;

/// Poll interval used when none is given. Independent of the time limit.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options for a single [`wait_for`] call.
#[derive(Clone)]
pub struct WaitOptions {
    /// Human readable name of the awaited fact, used in logs and timeout errors.
    pub label: String,
    /// Delay between two evaluations of the condition.
    pub poll_interval: Duration,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl WaitOptions {
    /// Options with the given label and default interval and clock.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Overrides the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            label: "condition".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Wait until `condition` yields `Some(value)` and return that value.
///
/// The condition is evaluated once immediately; an already satisfied
/// condition returns without sleeping. Otherwise it is re-evaluated every
/// `poll_interval` until it yields a value or `time_limit` elapses, in which
/// case [`StackError::Timeout`] carries the label. The last sleep is clamped
/// to the remaining time, so the timeout fires no earlier than `time_limit`
/// and no later than one interval after it.
///
/// # Errors
///
/// - [`StackError::Timeout`] if the condition never yields a value in time
/// - [`StackError::External`] as soon as the condition itself fails
///
/// # Example
///
/// ```rust,ignore
/// let cluster = wait_for(
///     || async { chain.clusters().await.map(|c| c.first().cloned()) },
///     Duration::from_secs(60),
///     WaitOptions::labeled("first cluster"),
/// )
/// .await?;
/// ```
pub async fn wait_for<T, F, Fut>(
    mut condition: F,
    time_limit: Duration,
    options: WaitOptions,
) -> StackResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let clock = options.clock.clone();
    let start = clock.now();

    if let Some(value) = condition().await? {
        return Ok(value);
    }

    debug!("Waiting for {}", options.label);

    loop {
        let elapsed = clock.now() - start;
        if elapsed >= time_limit {
            return Err(StackError::Timeout {
                label: options.label,
                limit: time_limit,
            });
        }

        let remaining = time_limit - elapsed;
        clock.sleep(options.poll_interval.min(remaining)).await;

        if let Some(value) = condition().await? {
            if log::log_enabled!(log::Level::Info) {
                info!(
                    "{} ready after {:?}",
                    options.label,
                    clock.now() - start
                );
            }
            return Ok(value);
        }
    }
}

/// [`wait_for`] for boolean conditions.
pub async fn wait_until<F, Fut>(
    mut condition: F,
    time_limit: Duration,
    options: WaitOptions,
) -> StackResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    wait_for(
        || {
            let fut = condition();
            async move { Ok::<_, anyhow::Error>(fut.await?.then_some(())) }
        },
        time_limit,
        options,
    )
    .await
}
