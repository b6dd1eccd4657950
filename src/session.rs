//! Session identity threading.
//!
//! One [`SessionContext`] is created per process run, before any agent
//! starts. Its id ties `AgentTaskStart` -> `ToolCallProposed` ->
//! `VerificationDecision` -> `ToolExecuted` chains together in the audit
//! trail, including across delegations.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Anchors all audit records of one run to a single identity.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Human identity running the session, for audit attribution.
    pub operator: Option<String>,
}

impl SessionContext {
    /// Create a new session. Call exactly once per run.
    pub fn new(operator: Option<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            operator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_unique() {
        let a = SessionContext::new(None);
        let b = SessionContext::new(Some("alice".to_string()));
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(b.operator.as_deref(), Some("alice"));
    }
}
