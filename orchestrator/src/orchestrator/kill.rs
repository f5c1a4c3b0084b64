// File: orchestrator/src/orchestrator/kill.rs
//
// Kill Switch
//
// The only cancellation primitive of the stack. One flag is owned by a
// ProcessSupervisor; every pending readiness wait and the bootstrap pipeline
// observe it through cloned handles.

use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};

/// How often background timers look at the kill flag.
pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cloneable handle over a stack-wide "kill requested" flag.
///
/// Setting the flag is permanent for the lifetime of the supervisor that
/// owns it: cancellation is all-or-nothing for the whole stack.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    flag: Arc<AtomicBool>,
}

impl KillSwitch {
    /// Creates an untriggered switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stack-wide kill.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a kill has been requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set, checking it every `poll` interval.
    pub async fn triggered(&self, poll: Duration) {
        if self.is_triggered() {
            return;
        }
        let mut ticker = time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.is_triggered() {
                return;
            }
        }
    }

    /// Triggers the switch on the first Ctrl-C received by this process.
    pub fn trigger_on_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let switch = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Interrupt received, stopping the stack");
                    switch.trigger();
                }
                Err(e) => warn!("Cannot listen for interrupt signal: {}", e),
            }
        })
    }
}
