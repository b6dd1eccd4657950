//! Canonical conversation model shared across all model backends.
//!
//! Backends convert to and from these types; the agent loop never sees a
//! provider-specific wire format. The content-block shape matches the
//! stateless messages API so that backend serializes messages directly;
//! the stateful backend translates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::tools::ToolSchema;

/// Default completion budget per turn.
pub const MAX_TOKENS: u32 = 8096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// A tool call proposal from the model. The id correlates the eventual
    /// result back into the conversation.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Tool results are carried on a user turn, one block per call.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Final text-only answer; the loop terminates.
    EndTurn,
    /// The response contains tool call proposals to dispatch.
    ToolUse,
    /// Anything else a backend reports (length, filtering, ...).
    Other(String),
}

/// Token accounting reported by the backend for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Normalized backend response: text segments and/or tool call proposals.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub stop_reason: StopReason,
    pub content: Vec<ContentBlock>,
    pub usage: TokenUsage,
}

impl ProviderResponse {
    /// All text segments joined, for the final answer.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }
}

/// A model backend normalized to one request/response contract.
///
/// `send` takes `&mut self` because stateful backends advance an internal
/// chat session per call; stateless backends simply ignore the mutability.
#[async_trait]
pub trait Provider: Send {
    /// Send the conversation plus tool catalog, returning a normalized
    /// response. Stateless backends transmit the full conversation every
    /// call; stateful backends transmit the newest turn against their
    /// retained session.
    async fn send(
        &mut self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderResponse, ProviderError>;

    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_blocks_serialize_in_wire_shape() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"path": "/x"}),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["name"], "read_file");

        let text = ContentBlock::Text {
            text: "hi".to_string(),
        };
        assert_eq!(serde_json::to_value(&text).unwrap()["type"], "text");
    }

    #[test]
    fn response_text_joins_segments() {
        let response = ProviderResponse {
            stop_reason: StopReason::EndTurn,
            content: vec![
                ContentBlock::Text {
                    text: "a".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "i".to_string(),
                    name: "n".to_string(),
                    input: serde_json::json!({}),
                },
                ContentBlock::Text {
                    text: "b".to_string(),
                },
            ],
            usage: TokenUsage::default(),
        };
        assert_eq!(response.text(), "a\nb");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.accumulate(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.accumulate(TokenUsage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
    }
}
