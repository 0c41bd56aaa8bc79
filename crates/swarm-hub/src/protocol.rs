//! JSON-RPC 2.0 envelope types shared by the Hub and Gateway clients
//!
//! Every call is a `tools/call` request whose `params.arguments` carries the
//! operation name and its typed arguments. Results come back as a tool result
//! whose first text block is itself a JSON document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Header carrying the server-assigned session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Protocol version announced during the initialize handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Errors surfaced by the Hub and Gateway clients
#[derive(Debug, Error)]
pub enum HubError {
    /// The connection could not be established, so the request never left
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Connection reset, truncated body and similar failures mid-request
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// JSON-RPC error object returned by the server
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The tool ran but reported failure (`isError: true`)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Response did not match the expected operation result shape
    #[error("Failed to decode {operation} result: {reason}")]
    Decode { operation: String, reason: String },

    /// Malformed envelope
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl HubError {
    /// Timeouts and connection failures are worth retrying; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HubError::Connect(_) | HubError::Transport(_) | HubError::Timeout
        )
    }

    /// The server cannot have seen the request
    pub fn is_unsent(&self) -> bool {
        matches!(self, HubError::Connect(_))
    }
}

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HubError::Timeout
        } else if e.is_connect() {
            HubError::Connect(e.to_string())
        } else {
            HubError::Transport(e.to_string())
        }
    }
}

pub type HubResult<T> = std::result::Result<T, HubError>;

/// Outgoing JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Build a `tools/call` request for `tool` running `operation` with `args`
    pub fn tool_call(id: u64, tool: &str, operation: &str, args: Value) -> Self {
        Self::new("tools/call", id).with_params(serde_json::json!({
            "name": tool,
            "arguments": {
                "operation": operation,
                "args": args,
            }
        }))
    }
}

/// Incoming JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[allow(dead_code)]
    #[serde(default)]
    pub data: Option<Value>,
}

/// `tools/call` result payload
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl RpcResponse {
    /// Turn the envelope into `Ok(result)` or the typed RPC failure
    pub fn into_result(self) -> HubResult<Value> {
        if let Some(err) = self.error {
            return Err(HubError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| HubError::Protocol("response has neither result nor error".to_string()))
    }
}

/// Decode the first text block of a tool result into `T`.
///
/// Fails closed: a missing block, a tool-reported error, or a JSON shape
/// mismatch are all errors.
pub fn decode_tool_result<T: DeserializeOwned>(operation: &str, result: Value) -> HubResult<T> {
    let call: ToolCallResult = serde_json::from_value(result).map_err(|e| HubError::Decode {
        operation: operation.to_string(),
        reason: format!("not a tool result: {}", e),
    })?;

    let text = call
        .content
        .first()
        .and_then(|c| c.text.as_deref())
        .ok_or_else(|| HubError::Decode {
            operation: operation.to_string(),
            reason: "missing content[0].text".to_string(),
        })?;

    if call.is_error {
        return Err(HubError::Tool(text.to_string()));
    }

    serde_json::from_str(text).map_err(|e| HubError::Decode {
        operation: operation.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a response body that is either plain JSON or a server-sent event
/// stream whose last `data:` line holds the JSON-RPC response.
pub fn parse_response_body(body: &str) -> HubResult<RpcResponse> {
    let trimmed = body.trim_start();
    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        trimmed
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .filter(|data| !data.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| HubError::Protocol("empty response body".to_string()))?
    };

    serde_json::from_str(&json)
        .map_err(|e| HubError::Protocol(format!("invalid JSON-RPC response: {}", e)))
}
