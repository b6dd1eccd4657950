//! Vertex AI backend.
//!
//! Model routing follows the model identifier:
//! - `claude-*` goes to the stateless messages endpoint (same request shape
//!   as the default backend, carried on Vertex).
//! - anything else (e.g. `gemini-*`) uses a stateful chat session: this
//!   provider retains the chat history internally and folds only the newest
//!   turn in per call, so one provider instance is scoped to exactly one
//!   agent task run.
//!
//! The chat path strips JSON-Schema fields the function-declaration format
//! does not support rather than failing the call.
//!
//! Authentication uses a bearer access token from `VERTEX_ACCESS_TOKEN`
//! (e.g. `gcloud auth print-access-token`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::providers::types::{
    ContentBlock, Message, Provider, ProviderResponse, StopReason, TokenUsage, MAX_TOKENS,
};
use crate::tools::ToolSchema;

/// JSON-Schema keys the function-declaration format rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] =
    &["$schema", "additionalProperties", "$defs", "definitions", "default"];

pub struct VertexProvider {
    client: reqwest::Client,
    project: String,
    location: String,
    model: String,
    token: SecretString,
    /// Retained chat history for the stateful path, in wire format.
    chat_contents: Vec<serde_json::Value>,
    /// Normalized tool-call ids -> tool names, for routing tool results
    /// back as function responses.
    tool_id_map: HashMap<String, String>,
}

impl VertexProvider {
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let token = std::env::var("VERTEX_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ProviderError::AuthFailed {
                provider: "vertex_ai".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            client,
            project: project.into(),
            location: location.into(),
            model: model.into(),
            token,
            chat_contents: Vec::new(),
            tool_id_map: HashMap::new(),
        })
    }

    fn endpoint(&self, publisher: &str, verb: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/{publisher}/models/{model}:{verb}",
            loc = self.location,
            proj = self.project,
            model = self.model,
        )
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: "vertex_ai".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthFailed {
                provider: "vertex_ai".to_string(),
            });
        }
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                provider: "vertex_ai".to_string(),
                retry_after: None,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: "vertex_ai".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
            provider: "vertex_ai".to_string(),
            reason: format!("JSON parse error: {e}"),
        })
    }

    /// Stateless path for claude-* models: full conversation every call.
    async fn send_messages(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderResponse, ProviderError> {
        let wire_tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "anthropic_version": "vertex-2023-10-16",
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": messages,
        });
        if !wire_tools.is_empty() {
            body["tools"] = serde_json::Value::Array(wire_tools);
        }

        let url = self.endpoint("anthropic", "rawPredict");
        let value = self.post(&url, &body).await?;
        Ok(normalize_messages(&value))
    }

    /// Stateful chat path: append the newest turn to the retained session.
    async fn send_chat(
        &mut self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderResponse, ProviderError> {
        if let Some(newest) = messages.last() {
            let parts = self.build_parts(newest);
            if !parts.is_empty() {
                self.chat_contents
                    .push(serde_json::json!({"role": "user", "parts": parts}));
            }
        }

        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": clean_schema(&t.parameters),
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": self.chat_contents,
            "generationConfig": {"maxOutputTokens": MAX_TOKENS},
        });
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        if !declarations.is_empty() {
            body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
        }

        let url = self.endpoint("google", "generateContent");
        let value = self.post(&url, &body).await?;

        // Retain the model turn so the session stays coherent.
        if let Some(model_content) = value
            .pointer("/candidates/0/content")
            .cloned()
            .filter(|c| !c.is_null())
        {
            self.chat_contents.push(model_content);
        }

        Ok(self.normalize_chat(&value))
    }

    /// Convert the newest canonical turn into chat parts.
    fn build_parts(&self, message: &Message) -> Vec<serde_json::Value> {
        let mut parts = Vec::new();
        for block in &message.content {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => {
                    parts.push(serde_json::json!({"text": text}));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                } => {
                    let name = self
                        .tool_id_map
                        .get(tool_use_id)
                        .cloned()
                        .unwrap_or_else(|| tool_use_id.clone());
                    parts.push(serde_json::json!({
                        "functionResponse": {
                            "name": name,
                            "response": {"content": content},
                        }
                    }));
                }
                _ => {}
            }
        }
        parts
    }

    fn normalize_chat(&mut self, value: &serde_json::Value) -> ProviderResponse {
        let mut content = Vec::new();
        let mut has_tool_calls = false;

        if let Some(parts) = value
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                    continue;
                }
                if let Some(call) = part.get("functionCall") {
                    let Some(name) = call.get("name").and_then(|n| n.as_str()) else {
                        continue;
                    };
                    let id = format!("call_{}", &Uuid::new_v4().simple().to_string()[..12]);
                    self.tool_id_map.insert(id.clone(), name.to_string());
                    content.push(ContentBlock::ToolUse {
                        id,
                        name: name.to_string(),
                        input: call.get("args").cloned().unwrap_or(serde_json::json!({})),
                    });
                    has_tool_calls = true;
                }
            }
        }

        let usage = TokenUsage {
            input_tokens: value
                .pointer("/usageMetadata/promptTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: value
                .pointer("/usageMetadata/candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        };

        ProviderResponse {
            stop_reason: if has_tool_calls {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            },
            content,
            usage,
        }
    }
}

#[async_trait]
impl Provider for VertexProvider {
    async fn send(
        &mut self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderResponse, ProviderError> {
        if self.model.to_lowercase().starts_with("claude") {
            self.send_messages(system, messages, tools).await
        } else {
            self.send_chat(system, messages, tools).await
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Normalize a messages-endpoint response body.
fn normalize_messages(value: &serde_json::Value) -> ProviderResponse {
    let mut content = Vec::new();
    if let Some(blocks) = value.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
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
                _ => {}
            }
        }
    }

    let stop_reason = match value.get("stop_reason").and_then(|s| s.as_str()) {
        Some("tool_use") => StopReason::ToolUse,
        Some("end_turn") | Some("stop_sequence") | None => StopReason::EndTurn,
        Some(other) => StopReason::Other(other.to_string()),
    };

    ProviderResponse {
        stop_reason,
        content,
        usage: TokenUsage {
            input_tokens: value
                .pointer("/usage/input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: value
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        },
    }
}

/// Strip JSON-Schema fields the function-declaration format does not
/// support, recursing into properties and items.
fn clean_schema(schema: &serde_json::Value) -> serde_json::Value {
    let Some(map) = schema.as_object() else {
        return schema.clone();
    };
    let mut cleaned = serde_json::Map::new();
    for (key, value) in map {
        if UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        match key.as_str() {
            "properties" => {
                let props = value
                    .as_object()
                    .map(|obj| {
                        obj.iter()
                            .map(|(k, v)| (k.clone(), clean_schema(v)))
                            .collect::<serde_json::Map<_, _>>()
                    })
                    .unwrap_or_default();
                cleaned.insert(key.clone(), serde_json::Value::Object(props));
            }
            "items" => {
                cleaned.insert(key.clone(), clean_schema(value));
            }
            _ => {
                cleaned.insert(key.clone(), value.clone());
            }
        }
    }
    serde_json::Value::Object(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_schema_strips_unsupported_keys() {
        let schema = serde_json::json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "default": "."},
                "entries": {
                    "type": "array",
                    "items": {"type": "object", "$defs": {}, "properties": {}}
                }
            }
        });
        let cleaned = clean_schema(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["path"].get("default").is_none());
        assert!(cleaned["properties"]["entries"]["items"].get("$defs").is_none());
        assert_eq!(cleaned["type"], "object");
    }

    #[test]
    fn normalizes_messages_body() {
        let value = serde_json::json!({
            "content": [
                {"type": "text", "text": "done"},
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 7, "output_tokens": 3}
        });
        let normalized = normalize_messages(&value);
        assert_eq!(normalized.stop_reason, StopReason::EndTurn);
        assert_eq!(normalized.text(), "done");
        assert_eq!(normalized.usage.output_tokens, 3);
    }

    #[test]
    fn chat_normalization_assigns_call_ids_and_routes_results() {
        std::env::set_var("VERTEX_ACCESS_TOKEN", "test-token");
        let mut provider = VertexProvider::new("proj", "us-central1", "gemini-2.0-flash").unwrap();

        let value = serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"functionCall": {"name": "read_file", "args": {"path": "/x"}}}
                    ]
                }
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4}
        });
        let normalized = provider.normalize_chat(&value);
        assert_eq!(normalized.stop_reason, StopReason::ToolUse);

        let ContentBlock::ToolUse { id, name, .. } = &normalized.content[0] else {
            panic!("expected tool_use");
        };
        assert_eq!(name, "read_file");
        assert!(id.starts_with("call_"));

        // The generated id routes the eventual tool result back by name.
        let message = Message::tool_results(vec![ContentBlock::ToolResult {
            tool_use_id: id.clone(),
            content: "contents".to_string(),
        }]);
        let parts = provider.build_parts(&message);
        assert_eq!(parts[0]["functionResponse"]["name"], "read_file");
    }
}
