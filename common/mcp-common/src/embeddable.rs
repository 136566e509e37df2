//! Embeddable MCP trait for in-process execution
//!
//! Lets a host (for example the HTTP front door) drive the same tools the
//! stdio transport exposes, without spawning a subprocess. Unlike the raw
//! protocol handler, `call_tool` is infallible: unknown tools and failed
//! executions both come back as error envelopes.
//!
//! ```rust,ignore
//! use mcp_common::EmbeddableMcp;
//!
//! let response = server.call_tool("browser_close", serde_json::json!({})).await;
//! assert!(!response.is_error);
//! ```

use async_trait::async_trait;
use rmcp::model::Tool;
use serde_json::Value;

use crate::envelope::ToolResponse;

/// Trait for MCP servers that can be executed in-process
#[async_trait]
pub trait EmbeddableMcp: Send + Sync {
    /// Server name as used in MCP client configuration
    fn server_name(&self) -> &str;

    /// All tools with their name, description, and input schema
    fn list_tools(&self) -> Vec<Tool>;

    /// Execute a tool by name
    ///
    /// Implementations must never panic or propagate errors out of this
    /// method; every outcome is a [`ToolResponse`].
    async fn call_tool(&self, name: &str, params: Value) -> ToolResponse;

    /// Whether a tool with this name is registered
    fn has_tool(&self, name: &str) -> bool {
        self.list_tools().iter().any(|tool| tool.name == name)
    }

    fn server_description(&self) -> Option<&str> {
        None
    }

    fn server_version(&self) -> Option<&str> {
        None
    }
}
