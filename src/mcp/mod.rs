//! MCP (Model Context Protocol) server exposing the knowledge base as tools
//!
//! JSON-RPC 2.0 over stdio, protocol version 2025-06-18.


pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::register_knowledge_tools;
