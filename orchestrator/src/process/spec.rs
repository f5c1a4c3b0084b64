//! Description of one managed process.

use super::args::ArgValue;
use crate::config::{ComponentKind, StackConfig, DEFAULT_ERROR_PATTERN};
use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;

/// Predicate evaluated against each raw output chunk while a process starts.
pub type OutputPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Readiness timeout of a spec built with [`ProcessSpec::new`].
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the supervisor needs to launch and judge one binary.
#[derive(Clone)]
pub struct ProcessSpec {
    /// Component name; keys the process table and names the log file.
    pub name: String,
    /// Binary to run. Relative paths with a directory part resolve against `work_dir`.
    pub binary: PathBuf,
    /// Ordered flag map.
    pub args: IndexMap<String, ArgValue>,
    /// Working directory.
    pub work_dir: PathBuf,
    /// Data directory, recreated empty before every start.
    pub data_dir: Option<PathBuf>,
    /// Environment added on top of the inherited one.
    pub env: IndexMap<String, String>,
    /// Time allowed between spawn and readiness.
    pub timeout: Duration,
    /// Settles the process as ready.
    pub is_ready: OutputPredicate,
    /// Settles the process as failed.
    pub is_error: OutputPredicate,
}

impl fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSpec")
            .field("name", &self.name)
            .field("binary", &self.binary)
            .field("args", &self.args)
            .field("work_dir", &self.work_dir)
            .field("data_dir", &self.data_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProcessSpec {
    /// Spec that never settles on output until predicates are set.
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args: IndexMap::new(),
            work_dir: PathBuf::from("."),
            data_dir: None,
            env: IndexMap::new(),
            timeout: DEFAULT_READY_TIMEOUT,
            is_ready: Arc::new(|_| false),
            is_error: Arc::new(|_| false),
        }
    }

    /// Spec of a stack component, with per-kind defaults for everything the config leaves out.
    pub fn from_component(kind: ComponentKind, config: &StackConfig) -> Self {
        let component = config.component(kind);
        let binary = component
            .binary
            .clone()
            .unwrap_or_else(|| kind.default_binary());
        let data_dir = component
            .data_dir
            .clone()
            .unwrap_or_else(|| Path::new("data").join(kind.as_ref()));
        let work_dir = component.work_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let ready = component
            .ready_pattern
            .clone()
            .unwrap_or_else(|| kind.default_ready_pattern().to_string());
        let error = component
            .error_pattern
            .clone()
            .unwrap_or_else(|| DEFAULT_ERROR_PATTERN.to_string());

        Self {
            name: kind.to_string(),
            binary: config.resolve_path(binary),
            args: component.args.clone(),
            work_dir: config.resolve_path(work_dir),
            data_dir: Some(config.resolve_path(data_dir)),
            env: component.env.clone(),
            timeout: component
                .timeout
                .map(Duration::from_millis)
                .unwrap_or_else(|| kind.default_timeout()),
            is_ready: Arc::new(move |chunk| chunk.contains(&ready)),
            is_error: Arc::new(move |chunk| chunk.contains(&error)),
        }
    }

    /// Append a flag.
    pub fn arg(mut self, flag: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.insert(flag.into(), value.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the readiness timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Settle as ready on the first chunk containing `pattern`.
    pub fn ready_on(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.ready_when(move |chunk| chunk.contains(&pattern))
    }

    /// Settle as failed on the first chunk containing `pattern`.
    pub fn error_on(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.error_when(move |chunk| chunk.contains(&pattern))
    }

    /// Custom readiness predicate.
    pub fn ready_when(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.is_ready = Arc::new(predicate);
        self
    }

    /// Custom error predicate.
    pub fn error_when(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.is_error = Arc::new(predicate);
        self
    }

    /// Binary path as it will be spawned. Bare names are left for `PATH` lookup.
    pub fn resolved_binary(&self) -> PathBuf {
        if self.binary.is_relative() && self.binary.components().count() > 1 {
            self.work_dir.join(&self.binary)
        } else {
            self.binary.clone()
        }
    }

    /// Data directory as it will be recreated.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| self.work_dir.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentConfig;

    #[test]
    fn test_from_component_defaults() {
        let config = StackConfig {
            root: PathBuf::from("/opt/stack"),
            ..Default::default()
        };

        let spec = ProcessSpec::from_component(ComponentKind::Worker, &config);

        assert_eq!(spec.name, "worker");
        assert_eq!(spec.binary, PathBuf::from("/opt/stack/bin/devnet-worker"));
        assert_eq!(spec.resolved_data_dir(), Some(PathBuf::from("/opt/stack/data/worker")));
        assert_eq!(spec.timeout, Duration::from_secs(60));
        assert!((spec.is_ready)("... Rocket has launched from http://0.0.0.0:8000"));
        assert!((spec.is_error)("Error: bind failed"));
        assert!(!(spec.is_error)("listening"));
    }

    #[test]
    fn test_from_component_overrides() {
        let mut config = StackConfig::default();
        config.relay = ComponentConfig {
            binary: Some(PathBuf::from("/usr/local/bin/relay")),
            timeout: Some(1500),
            ready_pattern: Some("relay-ready".to_string()),
            ..Default::default()
        };

        let spec = ProcessSpec::from_component(ComponentKind::Relay, &config);

        assert_eq!(spec.resolved_binary(), PathBuf::from("/usr/local/bin/relay"));
        assert_eq!(spec.timeout, Duration::from_millis(1500));
        assert!((spec.is_ready)("relay-ready\n"));
        assert!(!(spec.is_ready)("get_info response"));
    }

    #[test]
    fn test_binary_resolution() {
        let spec = ProcessSpec::new("tool", "sh").work_dir("/tmp/stack");
        assert_eq!(spec.resolved_binary(), PathBuf::from("sh"));

        let spec = ProcessSpec::new("tool", "bin/tool").work_dir("/tmp/stack");
        assert_eq!(spec.resolved_binary(), PathBuf::from("/tmp/stack/bin/tool"));
    }
}
