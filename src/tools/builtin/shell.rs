//! Shell execution tool.
//!
//! Two layers of machine-level control run before any subprocess is
//! spawned: the destructive-command blocklist and the size/timeout caps in
//! `validate`. Human approval through the verification gate is an
//! additional control on top of these, never a substitute — a blocked
//! command stays blocked no matter who approves it.
//!
//! The subprocess always runs with its working directory confined to the
//! agent's first allowed root.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::enforcer::AccessEnforcer;
use crate::tools::tool::{require_str, Tool, ToolError, ToolOutput};
use crate::validate::{clamp_shell_timeout, validate_command};

/// Maximum bytes of combined output returned to the conversation.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct ShellTool {
    enforcer: Arc<AccessEnforcer>,
}

impl ShellTool {
    pub fn new(enforcer: Arc<AccessEnforcer>) -> Self {
        Self { enforcer }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command. Always subject to verification. Dangerous \
         patterns are blocked unconditionally by security policy. The \
         working directory is the agent's first allowed root."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"},
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (max 300, default 60)",
                    "default": 60
                }
            },
            "required": ["command"]
        })
    }

    async fn precheck(&self, params: &serde_json::Value) -> Result<(), ToolError> {
        let command = require_str(params, "command")?;
        validate_command(command)?;
        Ok(())
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = require_str(&params, "command")?;
        validate_command(command)?;

        let requested = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = Duration::from_secs(clamp_shell_timeout(requested));

        let cwd = &self.enforcer.allowed_roots()[0];

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "failed to spawn command: {e}"
                )));
            }
            // kill_on_drop reaps the child when the future is dropped
            Err(_) => return Err(ToolError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout.into_owned());
        }
        if !stderr.is_empty() {
            parts.push(format!("[stderr]\n{stderr}"));
        }
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            parts.push(format!("[exit code: {code}]"));
        }

        let combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        Ok(ToolOutput::text(truncate_output(&combined)))
    }
}

/// Keep head and tail when output exceeds the cap.
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        return s.to_string();
    }
    let half = MAX_OUTPUT_BYTES / 2;
    let mut head_end = half;
    while !s.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = s.len() - half;
    while !s.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}\n\n... [truncated {} bytes] ...\n\n{}",
        &s[..head_end],
        s.len() - MAX_OUTPUT_BYTES,
        &s[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn tool(dir: &TempDir) -> ShellTool {
        ShellTool::new(Arc::new(
            AccessEnforcer::new(vec![dir.path().to_path_buf()], vec![]).unwrap(),
        ))
    }

    #[tokio::test]
    async fn runs_in_first_allowed_root() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);

        let out = tool
            .execute(serde_json::json!({"command": "pwd"}))
            .await
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(out.content.trim(), canonical.to_string_lossy());
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);

        let out = tool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}))
            .await
            .unwrap();
        assert!(out.content.contains("[stderr]\noops"));
        assert!(out.content.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn destructive_commands_fail_precheck() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);

        let params = serde_json::json!({"command": "rm -rf /"});
        assert!(matches!(
            tool.precheck(&params).await,
            Err(ToolError::Blocked(_))
        ));
        // Execution refuses too, independent of the gate
        assert!(matches!(
            tool.execute(params).await,
            Err(ToolError::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn times_out_and_kills() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);

        let result = tool
            .execute(serde_json::json!({"command": "sleep 30", "timeout": 1}))
            .await;
        assert!(matches!(result, Err(ToolError::Timeout(_))));
    }

    #[test]
    fn truncates_long_output() {
        let long = "x".repeat(MAX_OUTPUT_BYTES + 100);
        let truncated = truncate_output(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.contains("truncated"));
    }
}
