//! # Devstack Orchestrator
//!
//! Brings up a local chain node, secure worker and relay, and bootstraps the
//! chain until contracts can be deployed.
//!
//! ## Architecture Overview
//!
//! - **waiters**: poll a condition until it holds or a time limit passes
//! - **process**: spawn binaries and judge readiness from their output
//! - **events**: fan one chain event subscription out to filtered handlers
//! - **pipeline**: ordered, skippable steps with an abort hook
//! - **setup**: the bootstrap step vocabulary and setup versions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use devstack_orchestrator::prelude::*;
//!
//! let config = StackConfig::load("devstack.yml")?;
//! let stack = DevStack::new(config);
//! stack.abort_on_ctrl_c();
//!
//! let chain = ChainHandles::from_client(client, worker_api, SigningAccount::new("alice", alice));
//! let result = stack.bootstrap(chain).await?;
//! println!("Cluster {} ready", result.cluster_id);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Chain collaborator traits and call types
pub mod chain;

/// Resolved stack configuration
pub mod config;

/// Error types
pub mod error;

/// Chain event records and the dispatcher
pub mod events;

/// Time and cancellation primitives
pub mod orchestrator;

/// Ordered bootstrap steps
pub mod pipeline;

/// Managed process supervision
pub mod process;

/// Bootstrap context, steps and versions
pub mod setup;

/// The node + worker + relay stack
pub mod stack;

/// Polling waits
pub mod waiters;

/// Convenient re-exports for common usage
pub mod prelude {
    pub use crate::chain::{
        ChainCall, ChainQuery, ChainTransactor, DriverRole, EventSource, SigningAccount,
        WorkerApi, WorkerInfo,
    };
    pub use crate::config::{ComponentConfig, ComponentKind, RunMode, StackConfig};
    pub use crate::error::{StackError, StackResult};
    pub use crate::events::{filter_at, ArgFilter, ChainEvent, ChainEventDispatcher, EventRecord};
    pub use crate::orchestrator::{Clock, KillSwitch, PausedClock, SystemClock};
    pub use crate::pipeline::{Pipeline, PipelineReport, PipelineState, PipelineStep};
    pub use crate::process::{
        ProcessHandle, ProcessSpec, ProcessState, ProcessSupervisor, SupervisorOptions,
    };
    pub use crate::setup::{BootstrapResult, ChainHandles, ContractBundle, SetupContext, SetupVersion};
    pub use crate::stack::DevStack;
    pub use crate::waiters::{wait_for, wait_until, WaitOptions};
}

// Re-export commonly used types at crate root
pub use error::{StackError, StackResult};
pub use stack::DevStack;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
