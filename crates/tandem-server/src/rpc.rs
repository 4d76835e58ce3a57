use serde::{Deserialize, Serialize};

use tandem_core::ProgressionError;
use tandem_engine::EngineError;
use tandem_store::StoreError;

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// iOS-compatible response: `{ id, success, result?, error?: { code, message, data? } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error object; `code` is a string on the wire.
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// Standard JSON-RPC codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Application codes
pub const RATE_LIMITED: i32 = -32000;
pub const NOT_FOUND: i32 = -32001;
pub const INVALID_STATE: i32 = -32002;
pub const CONFLICT: i32 = -32003;
pub const UNAUTHORIZED: i32 = -32004;

/// Map numeric codes to the string codes clients switch on.
pub fn error_code_to_string(code: i32) -> &'static str {
    match code {
        PARSE_ERROR => "PARSE_ERROR",
        INVALID_REQUEST => "INVALID_REQUEST",
        METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
        INVALID_PARAMS => "INVALID_PARAMS",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        RATE_LIMITED => "RATE_LIMITED",
        NOT_FOUND => "NOT_FOUND",
        INVALID_STATE => "INVALID_STATE",
        CONFLICT => "CONFLICT",
        UNAUTHORIZED => "UNAUTHORIZED",
        _ => "UNKNOWN_ERROR",
    }
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: error_code_to_string(code).to_string(),
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn with_error_data(mut self, data: serde_json::Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.data = Some(data);
        }
        self
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, msg)
    }

    pub fn unauthorized(id: Option<serde_json::Value>) -> Self {
        Self::error(id, UNAUTHORIZED, "Missing or invalid bearer token")
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    /// Render an engine failure as a typed client error. Storage and
    /// delivery failures stay opaque.
    pub fn from_engine_error(id: Option<serde_json::Value>, err: &EngineError) -> Self {
        match err.as_progression() {
            Some(ProgressionError::NotFound(what)) => {
                Self::error(id, NOT_FOUND, format!("Not found: {what}"))
            }
            Some(ProgressionError::InvalidState(why)) => Self::error(id, INVALID_STATE, why),
            Some(ProgressionError::RateLimited { remaining_minutes }) => Self::error(
                id,
                RATE_LIMITED,
                format!(
                    "Please wait {remaining_minutes} more minute(s) before sending another reminder"
                ),
            )
            .with_error_data(serde_json::json!({ "remainingMinutes": remaining_minutes })),
            _ => match err {
                EngineError::Store(StoreError::Conflict(why)) => {
                    Self::error(id, CONFLICT, why.clone())
                }
                other => {
                    tracing::error!(
                        error_kind = other.error_kind(),
                        error = %other,
                        "rpc handler failed"
                    );
                    Self::internal_error(id, "Internal error")
                }
            },
        }
    }
}

/// Extract a required string param from the RPC params object.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

pub fn require_bool(params: &serde_json::Value, key: &str) -> Result<bool, String> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
