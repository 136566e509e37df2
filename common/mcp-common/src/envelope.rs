//! Uniform tool outcome envelope
//!
//! Every tool call, whether it succeeds or fails, is answered with a
//! [`ToolResponse`]. Transports never see a raw error: the MCP transport
//! converts the envelope into a `CallToolResult` and in-process callers read
//! the JSON text payload back with [`ToolResponse::parse_json`].

use base64::Engine;
use rmcp::model::{CallToolResult, Content};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A single piece of content in a tool response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain or JSON text
    Text { text: String },
    /// Base64 encoded binary image data
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// The single outcome envelope returned by every dispatcher path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl ToolResponse {
    /// Successful response carrying one text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Successful response with pretty-printed JSON
    ///
    /// A value that fails to serialize turns the response into an error
    /// rather than panicking.
    pub fn json<T: Serialize>(data: &T) -> Self {
        match serde_json::to_string_pretty(data) {
            Ok(json) => Self::text(json),
            Err(e) => Self::error(format!("Failed to serialize response: {}", e)),
        }
    }

    /// Successful response carrying an image, encoded as base64
    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Image {
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
                mime_type: mime_type.into(),
            }],
            is_error: false,
        }
    }

    /// Error response with a human readable message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// The first text block, if any
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Image { .. } => None,
        })
    }

    /// Parse the first text block as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let text = self
            .first_text()
            .ok_or_else(|| anyhow::anyhow!("response has no text content"))?;
        Ok(serde_json::from_str(text)?)
    }
}

impl From<ContentBlock> for Content {
    fn from(block: ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => Content::text(text),
            ContentBlock::Image { data, mime_type } => Content::image(data, mime_type),
        }
    }
}

impl From<ToolResponse> for CallToolResult {
    fn from(response: ToolResponse) -> Self {
        let content: Vec<Content> = response.content.into_iter().map(Into::into).collect();
        if response.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}
