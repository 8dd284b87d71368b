//! REST error payloads
//!
//! Every validation failure is reported as
//! `{"error": {"type": <int>, "address": <path>, "description": <text>}}`.

use serde_json::{json, Value};
use thiserror::Error;

/// API error codes
pub mod code {
    pub const INVALID_JSON: i32 = 2;
    pub const RESOURCE_NOT_AVAILABLE: i32 = 3;
    pub const METHOD_NOT_AVAILABLE: i32 = 4;
    pub const MISSING_PARAMETER: i32 = 5;
    pub const PARAMETER_NOT_AVAILABLE: i32 = 6;
    pub const INVALID_VALUE: i32 = 7;
    pub const TOO_MANY_ITEMS: i32 = 11;
    pub const RULE_ENGINE_FULL: i32 = 601;
    pub const ACTION_ERROR: i32 = 704;
}

/// Build one error map for a response list.
#[must_use]
pub fn error_map(code: i32, address: &str, description: &str) -> Value {
    tracing::info!("API error {code}, {address}, {description}");
    json!({
        "error": {
            "type": code,
            "address": address,
            "description": description,
        }
    })
}

/// Engine-internal error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("body contains invalid JSON")]
    InvalidJson,

    #[error("resource not available: {0}")]
    NotFound(String),

    #[error("invalid value, {0}, for parameter, {1}")]
    InvalidValue(String, String),
}

/// An HTTP-shaped response from a resource handler
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    #[must_use]
    pub fn bad_request(errors: Vec<Value>) -> Self {
        Self { status: 400, body: Value::Array(errors) }
    }

    #[must_use]
    pub fn not_found(address: &str) -> Self {
        Self {
            status: 404,
            body: Value::Array(vec![error_map(
                code::RESOURCE_NOT_AVAILABLE,
                address,
                &format!("resource, {address}, not available"),
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_map_shape() {
        let map = error_map(code::INVALID_VALUE, "/rules/status", "invalid value");
        assert_eq!(map["error"]["type"], 7);
        assert_eq!(map["error"]["address"], "/rules/status");
    }

    #[test]
    fn test_not_found_payload() {
        let rsp = ApiResponse::not_found("/rules/9");
        assert_eq!(rsp.status, 404);
        assert_eq!(rsp.body[0]["error"]["type"], code::RESOURCE_NOT_AVAILABLE);
        assert_eq!(
            rsp.body[0]["error"]["description"],
            "resource, /rules/9, not available"
        );
    }
}
