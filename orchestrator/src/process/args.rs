//! Command-line argument values for managed processes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value paired with a flag in a process argument list.
///
/// `true` emits the bare flag, `false` drops it, anything else emits the
/// flag followed by the rendered value as a separate argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// Presence flag.
    Switch(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Switch(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Serialize an ordered flag map into argv, preserving insertion order.
pub fn render_args(args: &IndexMap<String, ArgValue>) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() * 2);
    for (flag, value) in args {
        match value {
            ArgValue::Switch(true) => argv.push(flag.clone()),
            ArgValue::Switch(false) => {}
            other => {
                argv.push(flag.clone());
                argv.push(other.to_string());
            }
        }
    }
    argv
}
