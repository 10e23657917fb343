//! Parameter validation helpers.
//!
//! Typed extraction from [`serde_json::Value`] with user-facing messages
//! returned as [`ToolError::InvalidArguments`].

use serde_json::Value;

use crate::errors::ToolError;

/// Extract a required, non-empty string parameter.
pub fn validate_required_string(args: &Value, param: &str) -> Result<String, ToolError> {
    match args.get(param) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_) | Value::Null) | None => Err(ToolError::invalid(format!(
            "Missing required parameter: {param}"
        ))),
        Some(_) => Err(ToolError::invalid(format!(
            "Invalid type for parameter: {param} (expected string)"
        ))),
    }
}

/// Extract an optional non-negative integer parameter.
///
/// Missing and `null` both yield `None`; any other non-integer is an error.
pub fn optional_u64(args: &Value, param: &str) -> Result<Option<u64>, ToolError> {
    match args.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            ToolError::invalid(format!(
                "Invalid type for parameter: {param} (expected non-negative integer)"
            ))
        }),
    }
}
