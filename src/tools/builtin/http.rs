//! Network fetch tool.
//!
//! The URL is validated (length, scheme, SSRF over every resolved address)
//! before any network I/O. Redirects are not followed, so an open redirect
//! cannot route an approved fetch to an unvalidated destination. Response
//! bodies above the payload ceiling are rejected, not truncated.

use async_trait::async_trait;

use crate::tools::tool::{require_str, Tool, ToolError, ToolOutput};
use crate::validate::{check_content_size, clamp_fetch_timeout, validate_url};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch the content of a web URL and return the response body. Only \
         http/https is allowed; private and internal addresses are blocked; \
         redirects are not followed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch (http/https only)"},
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (max 60, default 30)",
                    "default": 30
                }
            },
            "required": ["url"]
        })
    }

    async fn precheck(&self, params: &serde_json::Value) -> Result<(), ToolError> {
        let url = require_str(params, "url")?;
        validate_url(url).await?;
        Ok(())
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let raw = require_str(&params, "url")?;
        let url = validate_url(raw).await?;

        let requested = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = std::time::Duration::from_secs(clamp_fetch_timeout(requested));

        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ToolError::Timeout(timeout)),
            Err(e) => return Ok(ToolOutput::text(format!("Request error: {e}"))),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !status.is_success() {
            return Ok(ToolOutput::text(format!("HTTP error {}", status.as_u16())));
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Ok(ToolOutput::text(format!("Error reading body: {e}"))),
        };
        check_content_size(&text, "response_body")?;

        Ok(ToolOutput::text(format!(
            "[Status: {}] [Content-Type: {content_type}]\n\n{text}",
            status.as_u16()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn precheck_blocks_private_targets() {
        let tool = FetchUrlTool::new();
        let params = serde_json::json!({"url": "http://169.254.169.254/latest/meta-data/"});
        assert!(matches!(
            tool.precheck(&params).await,
            Err(ToolError::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn precheck_blocks_bad_schemes() {
        let tool = FetchUrlTool::new();
        let params = serde_json::json!({"url": "ftp://example.com/x"});
        assert!(matches!(
            tool.precheck(&params).await,
            Err(ToolError::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn execute_refuses_what_precheck_refuses() {
        let tool = FetchUrlTool::new();
        let result = tool
            .execute(serde_json::json!({"url": "http://127.0.0.1/admin"}))
            .await;
        assert!(matches!(result, Err(ToolError::Blocked(_))));
    }
}
