//! Error types for stack orchestration.

use std::io::Error as IoError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error type for supervisor, dispatcher and bootstrap operations.
#[derive(Error, Debug)]
pub enum StackError {
    /// Binary missing or not executable.
    #[error("Failed to spawn {component} ({binary}): {source}")]
    Spawn {
        /// Component name.
        component: String,
        /// Resolved binary path.
        binary: PathBuf,
        /// Underlying error.
        #[source]
        source: IoError,
    },

    /// Neither the ready nor the error pattern showed up in time.
    #[error("{component} did not become ready within {timeout:?}\n{tail}")]
    ReadinessTimeout {
        /// Component name.
        component: String,
        /// Readiness timeout.
        timeout: Duration,
        /// Last output chunks.
        tail: String,
    },

    /// The error pattern matched before the ready pattern.
    #[error("{component} reported an error before becoming ready\n{tail}")]
    ErrorOutput {
        /// Component name.
        component: String,
        /// Last output chunks.
        tail: String,
    },

    /// Process exited before it settled.
    #[error("{component} exited before becoming ready (exit code {code:?})\n{tail}")]
    PrematureExit {
        /// Component name.
        component: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Last output chunks.
        tail: String,
    },

    /// Process exited after it settled; the whole stack is torn down.
    #[error("{component} exited unexpectedly (exit code {code:?})\n{tail}")]
    RuntimeExit {
        /// Component name.
        component: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Last output chunks.
        tail: String,
    },

    /// Aborted by the kill switch.
    #[error("{0} aborted by kill request")]
    Killed(String),

    /// A polled condition never became true.
    #[error("Timed out after {limit:?} waiting for {label}")]
    Timeout {
        /// Awaited fact.
        label: String,
        /// Time limit.
        limit: Duration,
    },

    /// A pipeline task failed; no later step ran.
    #[error("Step {index} ({title}) failed: {source}")]
    StepFailure {
        /// 1-based step position.
        index: usize,
        /// Step title.
        title: String,
        /// Underlying error.
        #[source]
        source: Box<StackError>,
    },

    /// No step-list builder is registered for this setup version.
    #[error("Unsupported setup version: {0}")]
    UnsupportedSetupVersion(String),

    /// A pipeline can only run once.
    #[error("Pipeline already ran (state: {0})")]
    AlreadyRun(String),

    /// A setup step needs chain access but none was supplied.
    #[error("Chain client not connected")]
    MissingChain,

    /// A setup version requires a driver contract that was not supplied.
    #[error("No contract bundle supplied for driver role {0}")]
    MissingDriver(String),

    /// Event payload could not be decoded into positional arguments.
    #[error("Failed to decode {key} event: {source}")]
    EventDecode {
        /// Event key.
        key: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// An event callback failed.
    #[error("Handler for {key} failed: {source}")]
    EventHandler {
        /// Event key.
        key: String,
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error on data directories or log files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Error raised by a chain or worker collaborator.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl StackError {
    /// Whether this error (or the step failure it wraps) came from the kill switch.
    pub fn is_killed(&self) -> bool {
        match self {
            Self::Killed(_) => true,
            Self::StepFailure { source, .. } => source.is_killed(),
            _ => false,
        }
    }
}

/// Result type alias for stack operations.
pub type StackResult<T> = Result<T, StackError>;
