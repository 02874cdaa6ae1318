//! Structured business errors ("problem details") embedded in `error.data`.
//!
//! A node may attach a problem-details object to a JSON-RPC error so that
//! callers can branch on `code` / `layer` instead of matching message text.
//! The object can arrive either inline or as a JSON-encoded string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured business error returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// Stable machine-readable code, e.g. `"INSUFFICIENT_FUNDS"`.
    pub code: String,
    /// Component that raised the error, e.g. `"mempool"`.
    #[serde(default)]
    pub layer: String,
    /// Message suitable for showing to an end user.
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub trace_id: String,
    /// RFC 3339 string or unix timestamp, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub status: i32,
}

impl std::fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = if self.user_message.is_empty() {
            &self.detail
        } else {
            &self.user_message
        };
        if self.layer.is_empty() {
            write!(f, "[{}] {message}", self.code)
        } else {
            write!(f, "[{}/{}] {message}", self.layer, self.code)
        }
    }
}

/// Try to interpret a JSON-RPC `error.data` value as [`ProblemDetails`].
///
/// Accepts an object of the expected shape or a string containing one.
/// Returns `None` for anything else, including objects without a `code`.
pub fn extract(data: Option<&Value>) -> Option<ProblemDetails> {
    let value = match data? {
        obj @ Value::Object(_) => obj.clone(),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)?,
        _ => return None,
    };
    from_value(value)
}

fn from_value(value: Value) -> Option<ProblemDetails> {
    let problem: ProblemDetails = serde_json::from_value(value).ok()?;
    if problem.code.trim().is_empty() {
        return None;
    }
    Some(problem)
}
