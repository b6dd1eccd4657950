//! Crate-wide error taxonomy.
//!
//! Each failure class maps to a distinct recovery path:
//! - [`PolicyError`] is fatal at load time, before any agent is built.
//! - [`AuditError`] is fatal at run time: no action may proceed without a
//!   durable record, so a failed append aborts the run.
//! - [`ProviderError`] is retried for transient classes, otherwise surfaced
//!   as a task failure.
//! - Access and validation failures are recovered locally by the agent loop
//!   and never reach this level; see `enforcer` and `validate`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::audit::AuditError;

/// Load-time configuration rejection. Blocks agent construction entirely.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(
        "verification mode 'never' is not permitted while high-risk tools are \
         enabled for agent '{agent}': {tools:?}. Use 'always' or 'selective'."
    )]
    HighRiskNeverMode { agent: String, tools: Vec<String> },

    #[error("agent '{agent}' enables unknown built-in tool(s): {tools:?}")]
    UnknownBuiltinTool { agent: String, tools: Vec<String> },
}

/// Model backend call failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed for provider '{provider}'")]
    AuthFailed { provider: String },

    #[error("request to provider '{provider}' failed: {reason}")]
    Transport { provider: String, reason: String },

    #[error("provider '{provider}' returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("rate limited by provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid response from provider '{provider}': {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("unknown provider type '{kind}'. Valid values: 'anthropic', 'vertex_ai'")]
    UnknownKind { kind: String },
}

impl ProviderError {
    /// Whether a retry with backoff has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport { .. } | ProviderError::RateLimited { .. } => true,
            ProviderError::Status { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

/// Top-level error for the orchestrator and agent loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("audit trail failure: {0}")]
    AuditAbort(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("agent '{name}' is not loaded")]
    UnknownAgent { name: String },

    #[error("failed to read agent definition {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("failed to parse agent definition {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("failed to build access enforcer for agent '{agent}': {reason}")]
    Enforcer { agent: String, reason: String },
}
