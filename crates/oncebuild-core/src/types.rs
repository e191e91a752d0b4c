use serde::{Deserialize, Serialize};
use std::fmt;

/// One named input value handed to the execution service when a build fires.
///
/// Values are untyped JSON so the scheduler stays decoupled from whatever
/// parameter model the execution service uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: serde_json::Value,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Strings print bare, everything else as compact JSON.
        match &self.value {
            serde_json::Value::String(s) => write!(f, "{}={}", self.name, s),
            other => write!(f, "{}={}", self.name, other),
        }
    }
}

/// Why a build was scheduled. Passed through to the execution service unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    /// Human-readable summary, e.g. "Scheduled by alice".
    pub description: String,
    /// Identity of the requester, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form metadata supplied by the caller.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl Cause {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            user_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl Default for Cause {
    fn default() -> Self {
        Self::new("Scheduled build")
    }
}

/// Multi-line summary of a parameter list, one `name=value` per line.
pub fn parameters_tooltip(values: &[ParameterValue]) -> String {
    let mut out = String::from("Build Parameters:");
    for v in values {
        out.push('\n');
        out.push_str(&v.to_string());
    }
    out
}
