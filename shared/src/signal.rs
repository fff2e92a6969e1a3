//! Named signal values as delivered by the upstream bus decoder.

use std::collections::BTreeMap;
use std::fmt;

/// Point-in-time copy of every live signal, ordered by key
pub type Snapshot = BTreeMap<String, SignalValue>;

/// A decoded signal value
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    Number(f64),
    Text(String),
}

impl SignalValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for SignalValue {
    fn from(value: f32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i64> for SignalValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for SignalValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for SignalValue {
    fn from(value: bool) -> Self {
        Self::Number(if value { 1.0 } else { 0.0 })
    }
}

impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One key/value update
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub key: String,
    pub value: SignalValue,
}

impl Signal {
    pub fn new(key: impl Into<String>, value: impl Into<SignalValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
