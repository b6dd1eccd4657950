//! Append-only audit trail.
//!
//! One JSONL stream per session, opened once in append mode and never read
//! or seeked by the running system. Every append serializes one record,
//! writes it, and flushes before returning; a failed write propagates as
//! [`AuditError`], which callers treat as fatal — no action may be taken
//! without a durable record.
//!
//! `SessionStart` is written at construction. `SessionEnd` is written by
//! [`AuditTrail::close`], and as a fallback on drop, so the bracket holds on
//! every exit path including panics unwinding.
//!
//! Ordering contract used by the verification gate: the `ToolCallProposed`
//! record is appended strictly before the proposal is shown to a human, and
//! the `VerificationDecision` record strictly after the human responds.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionContext;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to append audit record: {source}")]
    Write { source: io::Error },

    #[error("failed to serialize audit record: {source}")]
    Serialize { source: serde_json::Error },
}

/// Closed catalog of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    SessionStart,
    SessionEnd,
    AgentTaskStart,
    AgentTaskEnd,
    ToolCallProposed,
    VerificationDecision,
    ToolExecuted,
    ToolBlocked,
    ToolAccessDenied,
    AgentHandoff,
    ProviderConnect,
    ProviderConnectFailed,
    ValidationFailed,
}

/// Type-specific payload of one audit record. `None` fields are omitted
/// from the serialized line. Argument objects and result summaries must be
/// scrubbed by the caller before they land here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input_scrubbed: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turns_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            agent_name: None,
            model: None,
            tool_name: None,
            tool_input_scrubbed: None,
            verification_choice: None,
            outcome: None,
            result_summary: None,
            detail: None,
            task_summary: None,
            server_name: None,
            transport: None,
            command: None,
            tool_count: None,
            turns_used: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn agent(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn tool_input_scrubbed(mut self, input: serde_json::Value) -> Self {
        self.tool_input_scrubbed = Some(input);
        self
    }

    pub fn verification_choice(mut self, choice: impl Into<String>) -> Self {
        self.verification_choice = Some(choice.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn result_summary(mut self, summary: impl Into<String>) -> Self {
        self.result_summary = Some(summary.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn task_summary(mut self, summary: impl Into<String>) -> Self {
        self.task_summary = Some(summary.into());
        self
    }

    pub fn server(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn tool_count(mut self, count: usize) -> Self {
        self.tool_count = Some(count);
        self
    }

    pub fn turns_used(mut self, turns: u32) -> Self {
        self.turns_used = Some(turns);
        self
    }

    pub fn tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }
}

/// Full on-disk record shape: mandatory identity fields plus the event
/// payload flattened alongside them.
#[derive(Serialize)]
struct AuditRecord<'a> {
    event_id: Uuid,
    timestamp_utc: String,
    session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    operator: Option<&'a str>,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Append-only, synchronously flushed event log for one session.
pub struct AuditTrail {
    session_id: Uuid,
    operator: Option<String>,
    log_dir: PathBuf,
    path: PathBuf,
    file: Mutex<File>,
    closed: AtomicBool,
}

impl AuditTrail {
    /// Create the log directory if needed, open this session's stream in
    /// append mode, and write `SessionStart`.
    pub fn new(log_dir: impl Into<PathBuf>, session: &SessionContext) -> Result<Self, AuditError> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir).map_err(|e| AuditError::Open {
            path: log_dir.clone(),
            source: e,
        })?;

        let sid = session.session_id.simple().to_string();
        let date = Utc::now().format("%Y%m%d");
        let path = log_dir.join(format!("audit_{}_{date}.jsonl", &sid[..8]));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError::Open {
                path: path.clone(),
                source: e,
            })?;

        let trail = Self {
            session_id: session.session_id,
            operator: session.operator.clone(),
            log_dir,
            path,
            file: Mutex::new(file),
            closed: AtomicBool::new(false),
        };

        trail.append(AuditEvent::new(AuditEventType::SessionStart))?;
        Ok(trail)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Directory holding this session's stream. Always injected into every
    /// agent's protected dirs.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record: write a single JSON line and flush before
    /// returning. Writes serialize under the internal mutex so concurrent
    /// tasks within a session keep a total order.
    pub fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let record = AuditRecord {
            event_id: Uuid::new_v4(),
            timestamp_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            session_id: self.session_id,
            operator: self.operator.as_deref(),
            event: &event,
        };
        let mut line =
            serde_json::to_string(&record).map_err(|e| AuditError::Serialize { source: e })?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| AuditError::Write { source: e })
    }

    /// Write `SessionEnd` exactly once. Call on every orderly shutdown; the
    /// drop impl covers disorderly ones.
    pub fn close(&self) -> Result<(), AuditError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.append(AuditEvent::new(AuditEventType::SessionEnd))
    }
}

impl Drop for AuditTrail {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.append(AuditEvent::new(AuditEventType::SessionEnd));
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn read_events(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_session_bracket() {
        let dir = TempDir::new().unwrap();
        let session = SessionContext::new(Some("alice".to_string()));
        let trail = AuditTrail::new(dir.path(), &session).unwrap();
        let path = trail.path().to_path_buf();
        trail.close().unwrap();
        drop(trail);

        let events = read_events(&path);
        assert_eq!(events.first().unwrap()["event_type"], "SessionStart");
        assert_eq!(events.last().unwrap()["event_type"], "SessionEnd");
        // close() then drop must not double-write SessionEnd
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["operator"], "alice");
    }

    #[test]
    fn drop_writes_session_end() {
        let dir = TempDir::new().unwrap();
        let session = SessionContext::new(None);
        let trail = AuditTrail::new(dir.path(), &session).unwrap();
        let path = trail.path().to_path_buf();
        drop(trail);

        let events = read_events(&path);
        assert_eq!(events.last().unwrap()["event_type"], "SessionEnd");
    }

    #[test]
    fn records_carry_mandatory_fields() {
        let dir = TempDir::new().unwrap();
        let session = SessionContext::new(None);
        let trail = AuditTrail::new(dir.path(), &session).unwrap();

        trail
            .append(
                AuditEvent::new(AuditEventType::ToolExecuted)
                    .agent("researcher")
                    .tool("read_file")
                    .outcome("success"),
            )
            .unwrap();

        let events = read_events(trail.path());
        let record = &events[1];
        assert_eq!(record["event_type"], "ToolExecuted");
        assert_eq!(record["session_id"], session.session_id.to_string());
        assert_eq!(record["agent_name"], "researcher");
        assert!(record.get("event_id").is_some());
        // Sub-second UTC timestamp with explicit offset
        let ts = record["timestamp_utc"].as_str().unwrap();
        assert!(ts.contains('.') && ts.ends_with("+00:00"), "bad timestamp {ts}");
        // None fields are omitted, not serialized as null
        assert!(record.get("verification_choice").is_none());
    }

    #[test]
    fn events_keep_append_order() {
        let dir = TempDir::new().unwrap();
        let session = SessionContext::new(None);
        let trail = AuditTrail::new(dir.path(), &session).unwrap();

        for i in 0..5 {
            trail
                .append(AuditEvent::new(AuditEventType::ToolExecuted).detail(format!("n{i}")))
                .unwrap();
        }

        let events = read_events(trail.path());
        let details: Vec<_> = events
            .iter()
            .filter_map(|e| e.get("detail").and_then(|d| d.as_str()))
            .collect();
        assert_eq!(details, vec!["n0", "n1", "n2", "n3", "n4"]);
    }
}
