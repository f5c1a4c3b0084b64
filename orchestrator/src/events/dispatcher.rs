//! Single-subscription event dispatcher.
//!
//! One chain subscription is multiplexed to many handlers keyed by
//! `<source>.<kind>`. Handlers for a key run sequentially in registration
//! order; one-shot handlers are pruned only after the whole batch has been
//! dispatched.

use super::record::{ArgFilter, ChainEvent, EventRecord};
use crate::chain::EventSource;
use crate::error::{StackError, StackResult};
use futures::future::BoxFuture;
use log::{debug, error, trace};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Callback invoked with each matching event.
pub type EventCallback =
    Arc<dyn Fn(ChainEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Positional argument filters, keyed by argument index.
pub type ArgFilters = BTreeMap<usize, ArgFilter>;

/// Identifier returned by [`ChainEventDispatcher::register_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    filters: ArgFilters,
    callback: EventCallback,
    once: bool,
    alive: AtomicBool,
}

impl Subscription {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn matches(&self, event: &ChainEvent) -> bool {
        self.filters
            .iter()
            .all(|(position, filter)| filter.matches(event.args.get(*position)))
    }
}

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<String, Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
    // First failure of a background batch, reported by `destroy`
    fault: Mutex<Option<StackError>>,
}

impl Registry {
    fn live_handlers(&self, key: &str) -> Option<Vec<Arc<Subscription>>> {
        let handlers = self.handlers.lock();
        let subs = handlers.get(key)?;
        let live: Vec<_> = subs.iter().filter(|s| s.is_alive()).cloned().collect();
        (!live.is_empty()).then_some(live)
    }

    fn prune(&self) {
        let mut handlers = self.handlers.lock();
        handlers.retain(|_, subs| {
            subs.retain(|s| s.is_alive());
            !subs.is_empty()
        });
    }

    async fn dispatch(&self, batch: Vec<EventRecord>) -> StackResult<()> {
        for record in batch {
            let key = record.key();
            // Unwatched keys are skipped before their payload is decoded
            let Some(subs) = self.live_handlers(&key) else {
                trace!("No handler for {}", key);
                continue;
            };

            let event = record.decode()?;
            for sub in subs {
                if !sub.is_alive() || !sub.matches(&event) {
                    continue;
                }
                (sub.callback)(event.clone())
                    .await
                    .map_err(|source| StackError::EventHandler {
                        key: key.clone(),
                        source,
                    })?;
                if sub.once {
                    sub.alive.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }
}

/// Fans one chain event subscription out to many filtered handlers.
///
/// # Example
///
/// ```rust,ignore
/// let dispatcher = ChainEventDispatcher::new();
/// dispatcher.init(&*chain).await?;
///
/// let instantiated = dispatcher
///     .wait_for_event(keys::CONTRACT_INSTANTIATED, filters, Duration::from_secs(30))
///     .await?;
///
/// dispatcher.destroy().await?;
/// ```
#[derive(Default)]
pub struct ChainEventDispatcher {
    registry: Arc<Registry>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChainEventDispatcher {
    /// Create a dispatcher with no subscription yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe once to `source` and dispatch every batch in the background.
    ///
    /// A failing batch does not end the subscription: later batches are
    /// still dispatched and the first failure is kept for [`destroy`].
    /// Calling `init` again replaces the previous subscription.
    ///
    /// [`destroy`]: ChainEventDispatcher::destroy
    pub async fn init(&self, source: &dyn EventSource) -> StackResult<()> {
        let mut batches = source.subscribe().await?;
        let registry = self.registry.clone();

        let task = tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                if let Err(e) = Self::dispatch_with(&registry, batch).await {
                    error!("Event batch failed: {}", e);
                    registry.fault.lock().get_or_insert(e);
                }
            }
            debug!("Event subscription closed");
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Register a handler for `key` (`<source>.<kind>`).
    ///
    /// An empty filter map matches every event of the key. With `once`, the
    /// handler fires at most once and is removed after the batch in which it
    /// fired.
    pub fn register_handler<F>(
        &self,
        key: impl Into<String>,
        filters: ArgFilters,
        callback: F,
        once: bool,
    ) -> SubscriptionId
    where
        F: Fn(ChainEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::SeqCst));
        let sub = Arc::new(Subscription {
            id,
            filters,
            callback: Arc::new(callback),
            once,
            alive: AtomicBool::new(true),
        });
        self.registry
            .handlers
            .lock()
            .entry(key.into())
            .or_default()
            .push(sub);
        id
    }

    /// Remove a handler. Returns false if it was already gone.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut found = false;
        for subs in self.registry.handlers.lock().values() {
            for sub in subs.iter().filter(|s| s.id == id) {
                found |= sub.alive.swap(false, Ordering::SeqCst);
            }
        }
        self.registry.prune();
        found
    }

    /// Number of live handlers registered for `key`.
    pub fn handler_count(&self, key: &str) -> usize {
        self.registry
            .handlers
            .lock()
            .get(key)
            .map(|subs| subs.iter().filter(|s| s.is_alive()).count())
            .unwrap_or(0)
    }

    /// Dispatch one batch of records.
    ///
    /// A failing callback aborts the rest of the batch and its error is
    /// returned; handlers are never retried.
    pub async fn process_batch(&self, batch: Vec<EventRecord>) -> StackResult<()> {
        Self::dispatch_with(&self.registry, batch).await
    }

    async fn dispatch_with(registry: &Registry, batch: Vec<EventRecord>) -> StackResult<()> {
        let result = registry.dispatch(batch).await;
        registry.prune();
        result
    }

    /// Wait for the first event of `key` matching `filters`.
    pub async fn wait_for_event(
        &self,
        key: &str,
        filters: ArgFilters,
        timeout: Duration,
    ) -> StackResult<ChainEvent> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let id = self.register_handler(
            key,
            filters,
            move |event| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event);
                }
                Box::pin(async { Ok(()) })
            },
            true,
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            _ => {
                self.unregister(id);
                Err(StackError::Timeout {
                    label: format!("{} event", key),
                    limit: timeout,
                })
            }
        }
    }

    /// Cancel the subscription.
    ///
    /// Safe to call when `init` never ran. Returns the first failure of a
    /// batch dispatched in the background, if any.
    pub async fn destroy(&self) -> StackResult<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        match self.registry.fault.lock().take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

impl Drop for ChainEventDispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Convenience for building single-position filters.
pub fn filter_at(position: usize, filter: impl Into<ArgFilter>) -> ArgFilters {
    let mut filters = ArgFilters::new();
    filters.insert(position, filter.into());
    filters
}
