//! Model provider adapters.
//!
//! Heterogeneous backends — stateless request/response and stateful chat
//! sessions — are normalized behind the single [`Provider`] contract.
//! Backend selection is a pure function of the agent's configuration, not
//! runtime type inspection.

mod anthropic;
mod types;
mod vertex;

use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use types::{
    ContentBlock, Message, Provider, ProviderResponse, Role, StopReason, TokenUsage, MAX_TOKENS,
};
pub use vertex::VertexProvider;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::tools::ToolSchema;

/// Transient failures are retried this many times in total.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Instantiate the backend for an agent definition. The match is closed:
/// adding a backend means adding a variant here, not probing at runtime.
pub fn create_provider(
    config: &ProviderConfig,
    model: &str,
) -> Result<Box<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::Anthropic { base_url, api_key } => Ok(Box::new(AnthropicProvider::new(
            base_url.clone(),
            api_key.clone(),
            model,
        )?)),
        ProviderConfig::VertexAi { project, location } => {
            Ok(Box::new(VertexProvider::new(project, location, model)?))
        }
    }
}

/// Send with bounded retry: transient failures (network, 429, 5xx) back off
/// exponentially, honoring `Retry-After` when the backend provides one;
/// everything else surfaces immediately.
pub async fn send_with_retry(
    provider: &mut dyn Provider,
    system: &str,
    messages: &[Message],
    tools: &[ToolSchema],
) -> Result<ProviderResponse, ProviderError> {
    let mut attempt = 0;
    loop {
        match provider.send(system, messages, tools).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                attempt += 1;
                if !err.is_transient() || attempt >= MAX_ATTEMPTS {
                    return Err(err);
                }
                let backoff = match &err {
                    ProviderError::RateLimited {
                        retry_after: Some(after),
                        ..
                    } => *after,
                    _ => BACKOFF_BASE * 2u32.pow(attempt - 1),
                };
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient provider failure; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct FlakyProvider {
        failures_left: u32,
        calls: u32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn send(
            &mut self,
            _system: &str,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ProviderError::Transport {
                    provider: "flaky".to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok(ProviderResponse {
                stop_reason: StopReason::EndTurn,
                content: vec![ContentBlock::Text {
                    text: "ok".to_string(),
                }],
                usage: TokenUsage::default(),
            })
        }

        fn model(&self) -> &str {
            "flaky-model"
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let mut provider = FlakyProvider {
            failures_left: 2,
            calls: 0,
        };
        let response = send_with_retry(&mut provider, "", &[], &[]).await.unwrap();
        assert_eq!(response.text(), "ok");
        assert_eq!(provider.calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let mut provider = FlakyProvider {
            failures_left: 10,
            calls: 0,
        };
        let result = send_with_retry(&mut provider, "", &[], &[]).await;
        assert!(result.is_err());
        assert_eq!(provider.calls, MAX_ATTEMPTS);
    }

    struct AuthlessProvider;

    #[async_trait]
    impl Provider for AuthlessProvider {
        async fn send(
            &mut self,
            _system: &str,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::AuthFailed {
                provider: "x".to_string(),
            })
        }

        fn model(&self) -> &str {
            "x"
        }
    }

    #[tokio::test]
    async fn non_transient_failures_surface_immediately() {
        let mut provider = AuthlessProvider;
        let result = send_with_retry(&mut provider, "", &[], &[]).await;
        assert!(matches!(result, Err(ProviderError::AuthFailed { .. })));
    }
}
