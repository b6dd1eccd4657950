//! Stateless messages-API backend.
//!
//! Each call carries the full conversation; the server retains nothing
//! between calls. This is the default backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::providers::types::{
    ContentBlock, Message, Provider, ProviderResponse, StopReason, TokenUsage, MAX_TOKENS,
};
use crate::tools::ToolSchema;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl AnthropicProvider {
    /// Build from config, falling back to `ANTHROPIC_API_KEY` for the key.
    pub fn new(
        base_url: Option<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok().map(SecretString::from))
            .ok_or_else(|| ProviderError::AuthFailed {
                provider: "anthropic".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<serde_json::Value>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn send(
        &mut self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderResponse, ProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            tools: tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
            messages,
        };

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        tracing::debug!(model = %self.model, "sending messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthFailed {
                provider: "anthropic".to_string(),
            });
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited {
                provider: "anthropic".to_string(),
                retry_after,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: "anthropic".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: format!("JSON parse error: {e}"),
            })?;

        Ok(normalize(parsed))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn normalize(response: MessagesResponse) -> ProviderResponse {
    let mut content = Vec::new();
    for block in &response.content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                content.push(ContentBlock::ToolUse {
                    id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or(serde_json::json!({})),
                });
            }
            // Unknown block kinds (e.g. thinking) are skipped, not fatal.
            _ => {}
        }
    }

    let stop_reason = match response.stop_reason.as_deref() {
        Some("end_turn") | Some("stop_sequence") | None => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some(other) => StopReason::Other(other.to_string()),
    };

    ProviderResponse {
        stop_reason,
        content,
        usage: TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_text_and_tool_use() {
        let response = MessagesResponse {
            content: vec![
                serde_json::json!({"type": "text", "text": "thinking about it"}),
                serde_json::json!({
                    "type": "tool_use",
                    "id": "toolu_01",
                    "name": "read_file",
                    "input": {"path": "/ws/a.txt"}
                }),
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: WireUsage {
                input_tokens: 100,
                output_tokens: 25,
            },
        };

        let normalized = normalize(response);
        assert_eq!(normalized.stop_reason, StopReason::ToolUse);
        assert_eq!(normalized.content.len(), 2);
        assert_eq!(normalized.usage.input_tokens, 100);
        match &normalized.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "read_file");
                assert_eq!(input["path"], "/ws/a.txt");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn skips_unknown_block_kinds() {
        let response = MessagesResponse {
            content: vec![
                serde_json::json!({"type": "thinking", "thinking": "..."}),
                serde_json::json!({"type": "text", "text": "done"}),
            ],
            stop_reason: Some("end_turn".to_string()),
            usage: WireUsage::default(),
        };
        let normalized = normalize(response);
        assert_eq!(normalized.content.len(), 1);
        assert_eq!(normalized.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let provider = AnthropicProvider::new(
            Some("https://example.test".to_string()),
            Some(SecretString::from("sk-test")),
            "claude-sonnet-4-20250514",
        )
        .unwrap();
        assert_eq!(provider.model(), "claude-sonnet-4-20250514");
        assert_eq!(provider.base_url, "https://example.test");
    }
}
