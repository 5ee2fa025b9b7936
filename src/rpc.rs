use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// EIP-1474 "limit exceeded", used when a subscription cap is hit.
pub const LIMIT_EXCEEDED: i64 = -32005;

/// A JSON-RPC 2.0 request as received from a client or sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: Some(json!(1)), method: method.into(), params }
    }

    /// Structural validity beyond what serde enforces.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }

    /// The id to echo in a response, `null` when the request carried none.
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

/// A JSON-RPC 2.0 response, either a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("json-rpc error {code}: {message}")]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
        }
    }

    /// True when the response carries no usable result: an absent or `null`
    /// result, an empty string, or a bare `"0x"`.
    pub fn is_empty_result(&self) -> bool {
        match &self.result {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty() || s == "0x",
            Some(_) => false,
        }
    }
}

/// The `eth_subscription` notification frame pushed to clients.
pub fn subscription_notification(subscription_id: &str, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {
            "subscription": subscription_id,
            "result": result,
        }
    })
}

/// Failure of a forwarded upstream call.
///
/// Upstream JSON-RPC errors are not represented here: those arrive as a
/// well-formed [`JsonRpcResponse`] with the `error` member set.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

/// Injected collaborator that carries a request to an upstream provider.
///
/// Everything about upstream handling (selection, retries, hedging, rate
/// limits, deadlines) lives behind this seam. Implementations must be safe
/// to call concurrently.
#[async_trait]
pub trait ForwardRpc: Send + Sync {
    async fn forward(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ForwardError>;
}
