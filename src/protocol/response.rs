use serde::Serialize;
use serde_json::json;

use super::request::RpcId;
use crate::error::{ErrorKind, GatewayError};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 response layer
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 response envelope.
///
/// `id` is always serialized; it is `null` when the request id could not
/// be determined (parse errors).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RpcId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object (protocol-level errors).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Accepted ways of proving identity, advertised on auth failures.
pub const AUTH_METHODS: [&str; 2] = ["Authorization: Bearer <token>", "authorization_token argument"];

impl JsonRpcError {
    pub fn parse_error() -> Self {
        Self { code: -32700, message: "Parse error".into(), data: None }
    }

    pub fn invalid_request() -> Self {
        Self { code: -32600, message: "Invalid Request".into(), data: None }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self { code: -32602, message: detail.into(), data: None }
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self { code: -32603, message: detail.into(), data: None }
    }

    /// Map a classified gateway error onto a JSON-RPC error.
    ///
    /// `data` always carries `type`, `retryable` and `overloaded`; auth
    /// failures add `authMethods`. `detail` is only attached when
    /// `include_detail` is set (non-production).
    pub fn from_gateway(err: &GatewayError, include_detail: bool) -> Self {
        let retryable = err.retryable.unwrap_or_else(|| {
            err.http_status
                .is_some_and(|s| s >= 500 || matches!(s, 408 | 409 | 429))
        });
        let mut data = json!({
            "type": err.kind,
            "retryable": retryable,
            "overloaded": err.overloaded,
        });
        if err.total_attempts > 0 {
            data["attempt"] = json!(err.attempt);
            data["totalAttempts"] = json!(err.total_attempts);
        }
        if err.kind == ErrorKind::Auth {
            data["authMethods"] = json!(AUTH_METHODS);
        }
        if include_detail {
            data["detail"] = json!(format!("{err:?}"));
        }

        Self {
            code: err.kind.json_rpc_code(),
            message: err.public_message(),
            data: Some(data),
        }
    }
}

// ---------------------------------------------------------------------------
// MCP tool result layer (returned inside a *successful* JSON-RPC response)
// ---------------------------------------------------------------------------

/// MCP tool call result wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// A single content block inside a tool result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".into(),
                text: text.into(),
            }],
            structured_content: None,
            is_error: false,
        }
    }

    /// Text rendering of `data` plus the raw value as structured content.
    pub fn json(data: serde_json::Value) -> Self {
        let text = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
        Self {
            structured_content: Some(data),
            ..Self::text(text)
        }
    }
}
