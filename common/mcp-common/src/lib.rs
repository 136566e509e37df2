//! MCP Common - Shared utilities for MCP servers
//!
//! - **Envelope**: [`ToolResponse`], the uniform outcome of every tool call
//! - **Initialization**: [`init_tracing`] for stdio-safe logging
//! - **Embeddable**: [`EmbeddableMcp`] for in-process, name-keyed execution
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_common::ToolResponse;
//!
//! fn my_tool() -> ToolResponse {
//!     ToolResponse::json(&serde_json::json!({ "status": "success" }))
//! }
//! ```

pub mod embeddable;
pub mod envelope;
pub mod init;

// Re-export commonly used items at crate root
pub use embeddable::EmbeddableMcp;
pub use envelope::{ContentBlock, ToolResponse};
pub use init::{init_tracing, LogTarget};

// Re-export rmcp types that are commonly needed
pub use rmcp::{
    model::{CallToolResult, Content, Tool},
    ErrorData as McpError,
};

// Re-export async_trait for implementing EmbeddableMcp
pub use async_trait::async_trait;
