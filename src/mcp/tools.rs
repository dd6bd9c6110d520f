//! MCP tools exposing the knowledge base operations
//!
//! Every handler reports domain failures as `isError` results whose text starts
//! with the error kind, so clients can tell an extraction failure from a
//! generation failure without parsing prose.

use crate::KnowledgeError;
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::service::KnowledgeBase;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

fn required_str<'a>(args: &'a HashMap<String, Value>, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing required parameter: {}", name))
}

fn failure(error: &KnowledgeError) -> CallToolResult {
    error!("Tool call failed: {}", error);
    CallToolResult::error(format!("{}: {}", error.kind(), error))
}

/// Indexes a document given either a path on disk or inline text
pub struct UploadDocumentHandler {
    knowledge_base: Arc<KnowledgeBase>,
}

impl UploadDocumentHandler {
    #[inline]
    pub fn new(knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self { knowledge_base }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "upload_document".to_string(),
            description: Some(
                "Index a PDF or text document so later questions can draw on it".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of a file readable by the server"
                    },
                    "filename": {
                        "type": "string",
                        "description": "Name of an inline document; its extension selects the parser"
                    },
                    "content": {
                        "type": "string",
                        "description": "Text of an inline document"
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for UploadDocumentHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let (bytes, filename) = if let Some(path) = args.get("path").and_then(Value::as_str) {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => return Ok(failure(&KnowledgeError::Io(e))),
            };
            let filename = Path::new(path)
                .file_name()
                .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned());
            (bytes, filename)
        } else {
            let filename = required_str(&args, "filename")
                .map_err(|_| anyhow!("Provide either 'path' or both 'filename' and 'content'"))?;
            let content = required_str(&args, "content")?;
            (content.as_bytes().to_vec(), filename.to_string())
        };

        debug!("Tool upload_document: {} ({} bytes)", filename, bytes.len());

        match self.knowledge_base.upload(bytes, &filename).await {
            Ok(report) => Ok(CallToolResult::text(format!(
                "Uploaded {}: {} characters indexed as {} chunks",
                report.filename, report.characters, report.chunks
            ))),
            Err(e) => Ok(failure(&e)),
        }
    }
}

/// Answers a question within a conversation
pub struct QueryHandler {
    knowledge_base: Arc<KnowledgeBase>,
}

impl QueryHandler {
    #[inline]
    pub fn new(knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self { knowledge_base }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "query".to_string(),
            description: Some(
                "Answer a question from the indexed documents and the conversation so far"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {
                        "type": "string",
                        "description": "Identifier grouping questions into one conversation"
                    },
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    }
                },
                "required": ["conversation_id", "question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for QueryHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        let conversation_id = required_str(&args, "conversation_id")?;
        let question = required_str(&args, "question")?;

        debug!("Tool query in conversation {}", conversation_id);

        match self.knowledge_base.query(conversation_id, question).await {
            Ok(answer) => Ok(CallToolResult::text(answer)),
            Err(e) => Ok(failure(&e)),
        }
    }
}

/// Forgets a conversation's history
pub struct ClearMemoryHandler {
    knowledge_base: Arc<KnowledgeBase>,
}

impl ClearMemoryHandler {
    #[inline]
    pub fn new(knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self { knowledge_base }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "clear_memory".to_string(),
            description: Some("Discard the history of a conversation".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {
                        "type": "string",
                        "description": "Conversation to clear"
                    }
                },
                "required": ["conversation_id"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for ClearMemoryHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        let conversation_id = required_str(&args, "conversation_id")?;

        self.knowledge_base.clear_memory(conversation_id).await;
        Ok(CallToolResult::text(format!(
            "Memory cleared for conversation {conversation_id}"
        )))
    }
}

/// Register the upload, query and clear-memory tools against one knowledge base
#[inline]
pub async fn register_knowledge_tools(server: &McpServer, knowledge_base: &Arc<KnowledgeBase>) {
    server
        .register_tool(
            UploadDocumentHandler::tool_definition(),
            UploadDocumentHandler::new(Arc::clone(knowledge_base)),
        )
        .await;
    server
        .register_tool(
            QueryHandler::tool_definition(),
            QueryHandler::new(Arc::clone(knowledge_base)),
        )
        .await;
    server
        .register_tool(
            ClearMemoryHandler::tool_definition(),
            ClearMemoryHandler::new(Arc::clone(knowledge_base)),
        )
        .await;
}
