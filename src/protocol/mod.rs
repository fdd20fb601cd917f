//! Tool-protocol layer: JSON-RPC 2.0 envelopes and the per-tenant server.
//!
//! The hosting runtime only registers tools/prompts/resources and hands
//! requests to [`McpServer::handle`]; framing lives in `crate::server`.

pub mod jsonrpc;
pub mod server;

pub use jsonrpc::{CallToolResult, Content, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{
    McpServer, PromptHandler, ResourceHandler, ResourceMetadata, ServerInfo, ToolHandler,
};

/// JSON-RPC version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
