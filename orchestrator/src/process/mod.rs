//! Managed processes: argument rendering, specs, output capture and the supervisor.

/// Command line rendering of component arguments
pub mod args;
/// Output tail and per-component log files
pub mod output;
/// Process specification and readiness predicates
pub mod spec;
/// Spawning, settlement and shutdown
pub mod supervisor;

pub use args::{render_args, ArgValue};
pub use output::{OutputTail, OUTPUT_TAIL_CHUNKS};
pub use spec::{OutputPredicate, ProcessSpec, DEFAULT_READY_TIMEOUT};
pub use supervisor::{
    ProcessHandle, ProcessState, ProcessSupervisor, StopSignal, SupervisorOptions,
    STOP_GRACE_PERIOD,
};
