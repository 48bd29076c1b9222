// MCP tool server over stdio
//
// One JSON-RPC message per line on stdin, one response per line on stdout.
// Requests are handled strictly in order. Logs go to stderr.

use std::io::{self, BufRead, Read, Write};

use pqstep_io::DocumentGateway;
use pqstep_protocol::{
    AddColumnArgs, InitializeResult, Request, Response, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolCallResult, ToolDefinition, ToolsListResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, MAX_MESSAGE_SIZE, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION, TOOL_ADD_COLUMN,
    TOOL_LIST_QUERIES,
};
use serde_json::{json, Value};

use crate::tool::{AddColumnRequest, ColumnTool};

pub const SERVER_NAME: &str = "pqstep";

/// JSON-RPC error for a request that could not be dispatched.
type RpcFailure = (i32, String);

pub struct McpServer<G> {
    tool: ColumnTool<G>,
}

impl<G: DocumentGateway> McpServer<G> {
    pub fn new(tool: ColumnTool<G>) -> Self {
        Self { tool }
    }

    /// Serve until `input` reaches end of file.
    ///
    /// At most `MAX_MESSAGE_SIZE` bytes of a line are buffered; the rest of
    /// an oversized line is discarded and answered with an error.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> io::Result<()> {
        log::info!("MCP server ready (protocol {})", PROTOCOL_VERSION);

        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = (&mut input)
                .take(MAX_MESSAGE_SIZE as u64 + 1)
                .read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }

            let response = if !buf.ends_with(b"\n") && buf.len() > MAX_MESSAGE_SIZE {
                discard_line(&mut input)?;
                log::warn!("Dropped message larger than {} bytes", MAX_MESSAGE_SIZE);
                Some(too_large())
            } else {
                match std::str::from_utf8(&buf) {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => self.handle_line(line.trim_end_matches(['\r', '\n'])),
                    Err(e) => Some(Response::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e))),
                }
            };

            if let Some(response) = response {
                let text = serde_json::to_string(&response)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                output.write_all(text.as_bytes())?;
                output.write_all(b"\n")?;
                output.flush()?;
            }
        }

        log::info!("Input closed, MCP server exiting");
        Ok(())
    }

    /// Handle one message. Notifications produce no response.
    pub fn handle_line(&self, line: &str) -> Option<Response> {
        if line.len() > MAX_MESSAGE_SIZE {
            return Some(too_large());
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return Some(Response::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e))),
        };

        let id = value.get("id").cloned();
        let request: Request = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Some(Response::error(
                    id.unwrap_or(Value::Null),
                    INVALID_REQUEST,
                    format!("Invalid Request: {}", e),
                ))
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(Response::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                format!("Invalid Request: unsupported jsonrpc version '{}'", request.jsonrpc),
            ));
        }

        self.handle_request(request)
    }

    fn handle_request(&self, request: Request) -> Option<Response> {
        if request.is_notification() {
            log::debug!("Notification {}", request.method);
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        log::debug!("Request {} ({})", request.method, id);
        let result = match request.method.as_str() {
            "initialize" => to_value(initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => to_value(ToolsListResult {
                tools: tool_definitions(),
            }),
            "tools/call" => self.call_tool(request.params).and_then(to_value),
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        };

        Some(match result {
            Ok(value) => Response::result(id, value),
            Err((code, message)) => Response::error(id, code, message),
        })
    }

    fn call_tool(&self, params: Option<Value>) -> Result<ToolCallResult, RpcFailure> {
        let params: ToolCallParams = params
            .ok_or_else(|| (INVALID_PARAMS, "Missing params".to_string()))
            .and_then(|p| serde_json::from_value(p).map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e))))?;

        log::info!("Tool call {}", params.name);
        match params.name.as_str() {
            TOOL_ADD_COLUMN => {
                let args: AddColumnArgs = serde_json::from_value(params.arguments)
                    .map_err(|e| (INVALID_PARAMS, format!("Invalid arguments: {}", e)))?;
                let request = AddColumnRequest {
                    prompt: args.prompt,
                    column: args.column,
                    query: args.query,
                    ..AddColumnRequest::default()
                };
                Ok(match self.tool.add_column(&request) {
                    Ok(outcome) => ToolCallResult::text(outcome.message()),
                    Err(e) => ToolCallResult::error(e.to_string()),
                })
            }
            TOOL_LIST_QUERIES => Ok(match self.tool.list_queries(None) {
                Ok(list) => ToolCallResult::text(list.message()),
                Err(e) => ToolCallResult::error(e.to_string()),
            }),
            other => Err((INVALID_PARAMS, format!("Unknown tool: {}", other))),
        }
    }
}

fn too_large() -> Response {
    Response::error(
        Value::Null,
        INVALID_REQUEST,
        format!("Message too large (max {} bytes)", MAX_MESSAGE_SIZE),
    )
}

/// Skip input up to and including the next newline.
fn discard_line<R: BufRead>(input: &mut R) -> io::Result<()> {
    loop {
        let (found, used) = {
            let available = input.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        input.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, RpcFailure> {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: ServerCapabilities::default(),
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_ADD_COLUMN.to_string(),
            description: "Add a computed column to a Power Query query. The step is written by a language \
                          model from the prompt and inserted before the query's result. Use the prompt \
                          'update' to apply the configured default instruction."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "What the new column should compute"
                    },
                    "column": {
                        "type": "string",
                        "description": "Header of the new column (derived from the prompt if omitted)"
                    },
                    "query": {
                        "type": "string",
                        "description": "Query to modify (configured query if omitted)"
                    }
                },
                "required": ["prompt"]
            }),
        },
        ToolDefinition {
            name: TOOL_LIST_QUERIES.to_string(),
            description: "List the queries of the configured Power Query document.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}
