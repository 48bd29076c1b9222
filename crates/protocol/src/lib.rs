//! pqstep Tool Server Protocol - MCP over JSON-RPC 2.0
//!
//! This crate defines the wire types spoken by `pqstep serve`. The transport
//! is newline-delimited JSON-RPC 2.0 over stdin/stdout; each line carries
//! exactly one request, notification or response.
//!
//! # Protocol Version
//!
//! The server implements MCP revision [`PROTOCOL_VERSION`]. Tool names and
//! argument keys are part of the contract with MCP clients and must not be
//! renamed without a new tool name.
//!
//! # Usage
//!
//! ```ignore
//! use pqstep_protocol::{Request, Response};
//!
//! let request: Request = serde_json::from_str(&line)?;
//! let response = Response::result(request.id.clone().unwrap_or_default(), serde_json::json!({}));
//! println!("{}", serde_json::to_string(&response)?);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP revision implemented by the server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum accepted request line (10 MB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Tool that adds a computed column step to a query.
pub const TOOL_ADD_COLUMN: &str = "add_query_column";

/// Tool that lists the queries of the configured document.
pub const TOOL_LIST_QUERIES: &str = "list_queries";

// =============================================================================
// Error codes
// =============================================================================

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;

/// The JSON is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;

/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;

/// Internal server error.
pub const INTERNAL_ERROR: i32 = -32603;

// =============================================================================
// Envelope
// =============================================================================

/// Request or notification from the client.
///
/// A message without `id` is a notification and receives no response.
/// An explicit `"id": null` is kept as `Some(Value::Null)` and answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "present_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Any `id` member that is present, `null` included.
fn present_id<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Response sent to the client. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// =============================================================================
// initialize
// =============================================================================

/// Result of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

/// Tool capability flags. The tool list is static, so nothing is announced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

// =============================================================================
// tools/list
// =============================================================================

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDefinition>,
}

/// A tool advertised to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the `arguments` object
    pub input_schema: Value,
}

// =============================================================================
// tools/call
// =============================================================================

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Arguments of the `add_query_column` tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddColumnArgs {
    /// Natural-language instruction, or `update` for the configured default
    pub prompt: String,
    /// Header of the new column (derived from the prompt when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Query to modify (configured query when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Result of `tools/call`. Tool failures set `is_error` rather than
/// producing a JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
}
