// File: orchestrator/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Time and cancellation primitives shared by the waiters, the process
// supervisor and the bootstrap pipeline.

/// Clock abstractions for deterministic time control in tests
pub mod clock;
/// Stack-wide kill flag
pub mod kill;

pub use clock::{Clock, PausedClock, SystemClock};
pub use kill::{KillSwitch, KILL_POLL_INTERVAL};
