//! Tool trait and types.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enforcer::AccessError;
use crate::validate::ValidationError;

/// Error type for tool prechecks and execution. The variants map onto
/// distinct audit event types: `AccessDenied` -> `ToolAccessDenied`,
/// `Blocked` -> `ToolBlocked`; everything else surfaces as an execution
/// failure folded into the conversation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Not authorized: {0}")]
    AccessDenied(String),

    #[error("Blocked by security policy: {0}")]
    Blocked(String),

    #[error("External tool error: {0}")]
    ExternalService(String),

    /// An audit append failed inside the tool (e.g. during delegation).
    /// Unlike every other variant this is not recovered locally; the run
    /// must abort.
    #[error("Audit write failure: {0}")]
    AuditFailure(String),
}

impl From<AccessError> for ToolError {
    fn from(err: AccessError) -> Self {
        ToolError::AccessDenied(err.to_string())
    }
}

impl From<ValidationError> for ToolError {
    fn from(err: ValidationError) -> Self {
        ToolError::Blocked(err.to_string())
    }
}

/// Output from a tool execution, folded back into the conversation as a
/// tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// A tool's declared contract: name, description, and argument shape. Used
/// both for prompting the model and for post-edit re-validation in the
/// verification gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Trait for tools the agent can invoke.
///
/// Tools are constructed per agent instance, holding that agent's
/// `AccessEnforcer` where they touch the filesystem. They are never free
/// functions over global configuration; the isolation invariant is
/// structural.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Machine-level checks that run before the verification gate sees the
    /// proposal, and again on operator-edited arguments. Must not perform
    /// the side effect.
    async fn precheck(&self, _params: &serde_json::Value) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute the tool. Only called after precheck and gate approval.
    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Pull a required string argument out of a params object.
pub(crate) fn require_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{key}' parameter")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_error_maps_to_access_denied() {
        let err = AccessError::NoAllowedRoots;
        assert!(matches!(ToolError::from(err), ToolError::AccessDenied(_)));
    }

    #[test]
    fn validation_error_maps_to_blocked() {
        let err = ValidationError::BlockedCommand {
            pattern: "fork bomb",
        };
        let tool_err = ToolError::from(err);
        assert!(matches!(tool_err, ToolError::Blocked(_)));
        assert!(tool_err.to_string().contains("fork bomb"));
    }

    #[test]
    fn require_str_reports_missing_keys() {
        let params = serde_json::json!({"path": "/x"});
        assert_eq!(require_str(&params, "path").unwrap(), "/x");
        assert!(require_str(&params, "content").is_err());
    }
}
