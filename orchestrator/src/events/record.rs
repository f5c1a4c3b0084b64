//! Chain event records and argument filters.

use crate::error::{StackError, StackResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw event record as delivered by the chain subscription.
///
/// Positional arguments stay JSON-encoded in `payload` until a handler
/// actually needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Emitting module, e.g. `contracts`.
    pub source: String,
    /// Event name within the module, e.g. `Instantiated`.
    pub kind: String,
    /// JSON array of positional arguments.
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Build a record from already decoded arguments.
    pub fn new(source: impl Into<String>, kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            payload: Value::Array(args).to_string().into_bytes(),
        }
    }

    /// Registry key: `<source>.<kind>`.
    pub fn key(&self) -> String {
        event_key(&self.source, &self.kind)
    }

    /// Decode the positional arguments.
    pub fn decode(&self) -> StackResult<ChainEvent> {
        let args: Vec<Value> =
            serde_json::from_slice(&self.payload).map_err(|source| StackError::EventDecode {
                key: self.key(),
                source,
            })?;
        Ok(ChainEvent {
            source: self.source.clone(),
            kind: self.kind.clone(),
            args,
        })
    }
}

/// Decoded event handed to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEvent {
    /// Emitting module.
    pub source: String,
    /// Event name.
    pub kind: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl ChainEvent {
    /// Registry key: `<source>.<kind>`.
    pub fn key(&self) -> String {
        event_key(&self.source, &self.kind)
    }

    /// Positional argument rendered as a string (JSON strings lose their quotes).
    pub fn arg_str(&self, position: usize) -> Option<String> {
        self.args.get(position).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Build a registry key.
pub fn event_key(source: &str, kind: &str) -> String {
    format!("{}.{}", source, kind)
}

/// Constraint on one positional argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgFilter {
    /// Argument equals the value.
    Equals(Value),
    /// Argument is one of the values.
    OneOf(Vec<Value>),
}

impl ArgFilter {
    /// Whether `arg` satisfies the filter. A missing argument never does.
    pub fn matches(&self, arg: Option<&Value>) -> bool {
        let Some(arg) = arg else {
            return false;
        };
        match self {
            Self::Equals(expected) => expected == arg,
            Self::OneOf(allowed) => allowed.contains(arg),
        }
    }
}

impl From<Value> for ArgFilter {
    fn from(value: Value) -> Self {
        Self::Equals(value)
    }
}

impl From<&str> for ArgFilter {
    fn from(value: &str) -> Self {
        Self::Equals(Value::String(value.to_string()))
    }
}

impl From<Vec<Value>> for ArgFilter {
    fn from(values: Vec<Value>) -> Self {
        Self::OneOf(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_roundtrip_key() {
        let record = EventRecord::new("contracts", "Instantiated", vec![json!("alice"), json!("0x01")]);
        assert_eq!(record.key(), "contracts.Instantiated");

        let event = record.decode().unwrap();
        assert_eq!(event.arg_str(1).as_deref(), Some("0x01"));
        assert_eq!(event.arg_str(2), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let record = EventRecord {
            source: "system".to_string(),
            kind: "Remarked".to_string(),
            payload: b"not json".to_vec(),
        };
        assert!(matches!(
            record.decode(),
            Err(StackError::EventDecode { key, .. }) if key == "system.Remarked"
        ));
    }

    #[test]
    fn test_filters() {
        let eq = ArgFilter::from("0xaa");
        assert!(eq.matches(Some(&json!("0xaa"))));
        assert!(!eq.matches(Some(&json!("0xbb"))));
        assert!(!eq.matches(None));

        let set = ArgFilter::from(vec![json!(1), json!(2)]);
        assert!(set.matches(Some(&json!(2))));
        assert!(!set.matches(Some(&json!(3))));
    }
}
