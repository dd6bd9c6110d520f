//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over any async reader/writer pair, with stdio as the
//! production transport. Tools are registered with a handler each and dispatched
//! by name on `tools/call`.

use crate::mcp::protocol::*;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

/// MCP Server state and registered tools
pub struct McpServer {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    tools: Arc<RwLock<HashMap<String, Tool>>>,
    tool_handlers: Arc<RwLock<HashMap<String, Box<dyn ToolHandler>>>>,
    connection_state: Arc<RwLock<ConnectionState>>,
}

impl std::fmt::Debug for McpServer {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl McpServer {
    #[inline]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let capabilities = ServerCapabilities {
            experimental: None,
            logging: None,
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
        };

        Self {
            server_info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            capabilities,
            instructions: None,
            tools: Arc::new(RwLock::new(HashMap::new())),
            tool_handlers: Arc::new(RwLock::new(HashMap::new())),
            connection_state: Arc::new(RwLock::new(ConnectionState::Uninitialized)),
        }
    }

    /// Text returned to clients in the `initialize` result
    #[inline]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Register a tool with the server, replacing any tool of the same name
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();

        {
            let mut tools = self.tools.write().await;
            tools.insert(tool_name.clone(), tool);
        }

        {
            let mut handlers = self.tool_handlers.write().await;
            handlers.insert(tool_name.clone(), Box::new(handler));
        }

        debug!("Registered tool: {}", tool_name);
    }

    /// Names of all registered tools, sorted
    #[inline]
    pub async fn tool_names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        let reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(reader, &mut stdout).await
    }

    /// Read one JSON-RPC message per line until EOF, writing one reply line per request
    #[inline]
    pub async fn serve<R, W>(&self, mut reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(reply) = self.handle_line(trimmed).await {
                        send_message(writer, &reply).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from client: {}", e);
                    break;
                }
            }
        }

        *self.connection_state.write().await = ConnectionState::Closed;
        info!("MCP server stopped");
        Ok(())
    }

    /// Process one raw line; returns the reply, if the message calls for one
    #[inline]
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcMessage> {
        let raw_value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse JSON: {}", e);
                return Some(error_message(JsonRpcError::parse_error(), None));
            }
        };

        if raw_value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            warn!("Rejecting message without jsonrpc 2.0 marker");
            return Some(error_message(
                JsonRpcError::invalid_request(),
                request_id_of(&raw_value),
            ));
        }

        match serde_json::from_value::<JsonRpcMessage>(raw_value.clone()) {
            Ok(JsonRpcMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(&notification).await;
                None
            }
            Ok(JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_)) => {
                warn!("Received unexpected response message from client");
                None
            }
            Err(e) => {
                error!("Message validation failed: {}", e);
                Some(error_message(
                    JsonRpcError::invalid_request(),
                    request_id_of(&raw_value),
                ))
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        debug!("Handling request {}", request.method);

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            _ => {
                warn!("Unknown method: {}", request.method);
                return error_message(JsonRpcError::method_not_found(), Some(request.id));
            }
        };

        match response {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(e) => {
                error!("Error handling request {}: {:#}", request.method, e);
                let error = match e.downcast::<JsonRpcError>() {
                    Ok(rpc_error) => rpc_error,
                    Err(other) => JsonRpcError::internal_error(Some(other.to_string())),
                };
                error_message(error, Some(request.id))
            }
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => {
                debug!("Received cancellation notification");
            }
            _ => {
                warn!("Unknown notification method: {}", notification.method);
            }
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(Some(e.to_string())))?,
            None => {
                return Err(JsonRpcError::invalid_params(Some(
                    "Initialize request missing parameters".to_string(),
                ))
                .into());
            }
        };

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            return Err(JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!(
                    "Unsupported protocol version: {}. Supported: {}",
                    params.protocol_version,
                    SUPPORTED_PROTOCOL_VERSIONS.join(", ")
                ),
                None,
            )
            .into());
        }

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };

        info!("Client initialized: {}", params.client_info.name);
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_tools(&self) -> Result<Value> {
        let tools = self.tools.read().await;
        let mut tools_vec: Vec<Tool> = tools.values().cloned().collect();
        tools_vec.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(serde_json::to_value(ListToolsResult { tools: tools_vec })?)
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(Some(e.to_string())))?,
            None => {
                return Err(JsonRpcError::invalid_params(Some(
                    "Tool call request missing parameters".to_string(),
                ))
                .into());
            }
        };

        let handlers = self.tool_handlers.read().await;
        let handler = handlers.get(&params.name).ok_or_else(|| {
            anyhow!(JsonRpcError::invalid_params(Some(format!(
                "Tool not found: {}",
                params.name
            ))))
        })?;

        let result = handler.handle(params).await?;
        Ok(serde_json::to_value(result)?)
    }
}

impl std::fmt::Display for JsonRpcError {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

fn request_id_of(value: &Value) -> Option<RequestId> {
    value
        .get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
}

fn error_message(error: JsonRpcError, id: Option<RequestId>) -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
}

async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
