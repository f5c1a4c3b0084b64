//! Resolved stack configuration.
//!
//! The CLI and config-file layers live outside this crate; they hand over a
//! [`StackConfig`], usually loaded from a YAML or JSON file.

use crate::chain::DriverRole;
use crate::error::{StackError, StackResult};
use crate::process::ArgValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tokio::time::Duration;

/// Default block production interval in milliseconds.
pub const DEFAULT_BLOCK_TIME_MS: u64 = 6000;

/// Substring that fails any component still starting up.
pub const DEFAULT_ERROR_PATTERN: &str = "Error:";

const fn default_block_time() -> u64 {
    DEFAULT_BLOCK_TIME_MS
}

const fn default_save_logs() -> bool {
    true
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_setup_version() -> String {
    "default".to_string()
}

/// The three managed processes, in start order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Chain node.
    Node,
    /// Secure compute worker.
    Worker,
    /// Relay between node and worker.
    Relay,
}

impl ComponentKind {
    /// Binary used when the config names none.
    pub fn default_binary(&self) -> PathBuf {
        PathBuf::from(format!("bin/devnet-{}", self))
    }

    /// Output substring announcing readiness.
    pub fn default_ready_pattern(&self) -> &'static str {
        match self {
            Self::Node => "Running JSON-RPC",
            Self::Worker => "Rocket has launched",
            Self::Relay => "get_info response",
        }
    }

    /// Readiness timeout when the config names none.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Node => Duration::from_secs(30),
            Self::Worker => Duration::from_secs(60),
            Self::Relay => Duration::from_secs(30),
        }
    }
}

/// Console behavior of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Echo process output to the console.
    #[default]
    Simple,
    /// Keep the console quiet; output goes only to log files.
    Testing,
}

impl RunMode {
    /// Whether process output is echoed to stdout.
    pub fn echoes_output(&self) -> bool {
        matches!(self, Self::Simple)
    }
}

/// Per-process settings. Every field falls back to a per-[`ComponentKind`] default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Binary path, relative to the stack root unless absolute.
    pub binary: Option<PathBuf>,
    /// Working directory; defaults to the stack root.
    pub work_dir: Option<PathBuf>,
    /// Data directory, wiped on every start; defaults to `data/<component>`.
    pub data_dir: Option<PathBuf>,
    /// Ordered flag map.
    pub args: IndexMap<String, ArgValue>,
    /// Extra environment variables.
    pub env: IndexMap<String, String>,
    /// Readiness timeout in milliseconds.
    pub timeout: Option<u64>,
    /// Output substring announcing readiness.
    pub ready_pattern: Option<String>,
    /// Output substring announcing a startup failure.
    pub error_pattern: Option<String>,
}

/// Resolved configuration of one local stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Project root all relative paths are anchored at.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Block production interval in milliseconds. On-chain waits scale with it.
    #[serde(default = "default_block_time")]
    pub block_time: u64,

    /// Console behavior.
    #[serde(default)]
    pub run_mode: RunMode,

    /// Write one log file per component.
    #[serde(default = "default_save_logs")]
    pub save_logs: bool,

    /// Log directory; each run gets a timestamped subdirectory.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Bootstrap variant, see [`crate::setup::SetupVersion`].
    #[serde(default = "default_setup_version")]
    pub setup_version: String,

    /// Chain node.
    #[serde(default)]
    pub node: ComponentConfig,

    /// Secure worker.
    #[serde(default)]
    pub worker: ComponentConfig,

    /// Relay.
    #[serde(default)]
    pub relay: ComponentConfig,

    /// Compiled contract bundles per driver role.
    #[serde(default)]
    pub drivers: IndexMap<DriverRole, PathBuf>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            block_time: DEFAULT_BLOCK_TIME_MS,
            run_mode: RunMode::default(),
            save_logs: true,
            log_dir: default_log_dir(),
            setup_version: default_setup_version(),
            node: ComponentConfig::default(),
            worker: ComponentConfig::default(),
            relay: ComponentConfig::default(),
            drivers: IndexMap::new(),
        }
    }
}

impl StackConfig {
    /// Load a config file. `.yml`/`.yaml` files are parsed as YAML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> StackResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StackError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| StackError::Config(format!("{}: {}", path.display(), e)))
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| StackError::Config(format!("{}: {}", path.display(), e)))
        }
    }

    /// Settings of one component.
    pub fn component(&self, kind: ComponentKind) -> &ComponentConfig {
        match kind {
            ComponentKind::Node => &self.node,
            ComponentKind::Worker => &self.worker,
            ComponentKind::Relay => &self.relay,
        }
    }

    /// Anchor a relative path at the stack root.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Block production interval.
    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time)
    }

    /// Time limit for an on-chain fact expected within `blocks` blocks.
    pub fn wait_limit(&self, blocks: u32) -> Duration {
        self.block_time() * blocks
    }

    /// Log directory for a run started now, or `None` when logs are not saved.
    pub fn run_log_dir(&self) -> Option<PathBuf> {
        if !self.save_logs {
            return None;
        }
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Some(self.resolve_path(&self.log_dir).join(stamp.to_string()))
    }
}
