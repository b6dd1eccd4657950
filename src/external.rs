//! External tool host.
//!
//! Agents can extend their tool set with external tool servers: local
//! subprocesses speaking line-delimited JSON on stdio. Only this `local`
//! transport is supported; other transports deserialize fine but are
//! rejected at connect time with a logged warning.
//!
//! Protocol: on connect the host sends `{"op":"describe"}` and expects one
//! line back with `{"tools":[{name, description, parameters}, ...]}`. Per
//! call it sends `{"op":"call","tool":...,"args":...}` and reads one
//! response line with `{"content": ...}` or `{"error": ...}`. Responses are
//! size-capped before being returned to the agent.
//!
//! Server `env` blocks may contain credentials: they are passed to the
//! subprocess and never written to the audit trail.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::config::ExternalToolConfig;
use crate::error::Error;
use crate::tools::{ToolError, ToolSchema};
use crate::validate::MAX_CONTENT_BYTES;

/// Time allowed for the describe handshake and for each call.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    tools: Vec<ToolSchema>,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

struct Connection {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    tools: Vec<ToolSchema>,
}

impl Connection {
    async fn request(&mut self, payload: &serde_json::Value) -> Result<String, ToolError> {
        let mut line = serde_json::to_string(payload)
            .map_err(|e| ToolError::ExternalService(format!("encoding request: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolError::ExternalService(format!("writing to '{}': {e}", self.name)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ToolError::ExternalService(format!("writing to '{}': {e}", self.name)))?;

        let mut response = String::new();
        let read = tokio::time::timeout(CALL_TIMEOUT, self.stdout.read_line(&mut response))
            .await
            .map_err(|_| ToolError::Timeout(CALL_TIMEOUT))?
            .map_err(|e| ToolError::ExternalService(format!("reading from '{}': {e}", self.name)))?;
        if read == 0 {
            return Err(ToolError::ExternalService(format!(
                "server '{}' closed its stream",
                self.name
            )));
        }
        Ok(response)
    }
}

/// Manages external tool server connections for one agent instance.
#[derive(Default)]
pub struct ExternalToolHost {
    connections: Vec<Connection>,
}

impl ExternalToolHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to every configured server, emitting `ProviderConnect` /
    /// `ProviderConnectFailed` per server. A server that fails to connect
    /// is skipped, not fatal.
    pub async fn connect_all(
        &mut self,
        configs: &[ExternalToolConfig],
        audit: &AuditTrail,
    ) -> Result<(), Error> {
        for config in configs {
            if config.transport != "local" {
                tracing::warn!(
                    server = %config.name,
                    transport = %config.transport,
                    "transport not supported for external tool server; skipping"
                );
                continue;
            }
            match connect_local(config).await {
                Ok(connection) => {
                    audit.append(
                        AuditEvent::new(AuditEventType::ProviderConnect)
                            .server(&config.name)
                            .transport(&config.transport)
                            .command(&config.command)
                            .tool_count(connection.tools.len()),
                        // env deliberately omitted: may contain credentials
                    )?;
                    tracing::info!(
                        server = %config.name,
                        tools = connection.tools.len(),
                        "connected to external tool server"
                    );
                    self.connections.push(connection);
                }
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "external tool server connect failed");
                    audit.append(
                        AuditEvent::new(AuditEventType::ProviderConnectFailed)
                            .server(&config.name)
                            .detail(e.to_string()),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Declared contracts of every discovered external tool.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.connections
            .iter()
            .flat_map(|c| c.tools.iter().cloned())
            .collect()
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.connections
            .iter()
            .any(|c| c.tools.iter().any(|t| t.name == tool_name))
    }

    /// Invoke an external tool and return its content, size-capped.
    pub async fn call(
        &mut self,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let connection = self
            .connections
            .iter_mut()
            .find(|c| c.tools.iter().any(|t| t.name == tool_name))
            .ok_or_else(|| {
                ToolError::ExternalService(format!("no server provides tool '{tool_name}'"))
            })?;

        let response = connection
            .request(&serde_json::json!({"op": "call", "tool": tool_name, "args": args}))
            .await?;

        let parsed: CallResponse = serde_json::from_str(&response)
            .map_err(|e| ToolError::ExternalService(format!("malformed response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ToolError::ExternalService(error));
        }

        let content = match parsed.content {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        Ok(cap_response(content))
    }

    /// Kill all server processes.
    pub async fn shutdown(&mut self) {
        for mut connection in self.connections.drain(..) {
            let _ = connection.child.start_kill();
            let _ = connection.child.wait().await;
        }
    }
}

async fn connect_local(config: &ExternalToolConfig) -> Result<Connection, ToolError> {
    let mut child = Command::new(&config.command)
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::ExternalService(format!("spawning '{}': {e}", config.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ToolError::ExternalService("no stdin pipe".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .map(BufReader::new)
        .ok_or_else(|| ToolError::ExternalService("no stdout pipe".to_string()))?;

    let mut connection = Connection {
        name: config.name.clone(),
        child,
        stdin,
        stdout,
        tools: Vec::new(),
    };

    let response = connection
        .request(&serde_json::json!({"op": "describe"}))
        .await?;
    let described: DescribeResponse = serde_json::from_str(&response)
        .map_err(|e| ToolError::ExternalService(format!("malformed describe response: {e}")))?;
    connection.tools = described.tools;

    Ok(connection)
}

/// Truncate an external response to the payload ceiling.
fn cap_response(text: String) -> String {
    if text.len() <= MAX_CONTENT_BYTES {
        return text;
    }
    let mut end = MAX_CONTENT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n...[truncated: response exceeded {} MB]",
        &text[..end],
        MAX_CONTENT_BYTES / (1024 * 1024)
    )
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::session::SessionContext;

    use super::*;

    /// A tiny external server implemented in shell: answers the describe
    /// handshake and echoes call args back.
    fn echo_server_config() -> ExternalToolConfig {
        let script = r#"
            read line
            printf '%s\n' '{"tools":[{"name":"echo","description":"echo args","parameters":{"type":"object","properties":{}}}]}'
            while read line; do
                printf '{"content":"echoed"}\n'
            done
        "#;
        ExternalToolConfig {
            name: "echo-server".to_string(),
            transport: "local".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: std::collections::HashMap::new(),
        }
    }

    #[tokio::test]
    async fn connects_and_calls_local_server() {
        let dir = TempDir::new().unwrap();
        let audit = AuditTrail::new(dir.path(), &SessionContext::new(None)).unwrap();

        let mut host = ExternalToolHost::new();
        host.connect_all(&[echo_server_config()], &audit)
            .await
            .unwrap();

        assert!(host.has_tool("echo"));
        assert_eq!(host.schemas().len(), 1);

        let content = host
            .call("echo", &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(content, "echoed");

        let log = std::fs::read_to_string(audit.path()).unwrap();
        assert!(log.contains("ProviderConnect"));
        assert!(log.contains("echo-server"));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn unsupported_transport_is_skipped() {
        let dir = TempDir::new().unwrap();
        let audit = AuditTrail::new(dir.path(), &SessionContext::new(None)).unwrap();

        let config = ExternalToolConfig {
            name: "remote".to_string(),
            transport: "sse".to_string(),
            command: "irrelevant".to_string(),
            args: vec![],
            env: std::collections::HashMap::new(),
        };

        let mut host = ExternalToolHost::new();
        host.connect_all(&[config], &audit).await.unwrap();
        assert!(host.schemas().is_empty());

        // Skipped, not failed: no connect events either way.
        let log = std::fs::read_to_string(audit.path()).unwrap();
        assert!(!log.contains("ProviderConnect"));
    }

    #[tokio::test]
    async fn failed_spawn_emits_connect_failed() {
        let dir = TempDir::new().unwrap();
        let audit = AuditTrail::new(dir.path(), &SessionContext::new(None)).unwrap();

        let config = ExternalToolConfig {
            name: "ghost".to_string(),
            transport: "local".to_string(),
            command: "/nonexistent/binary".to_string(),
            args: vec![],
            env: std::collections::HashMap::new(),
        };

        let mut host = ExternalToolHost::new();
        host.connect_all(&[config], &audit).await.unwrap();

        let log = std::fs::read_to_string(audit.path()).unwrap();
        assert!(log.contains("ProviderConnectFailed"));
    }

    #[test]
    fn caps_oversized_responses() {
        let big = "y".repeat(MAX_CONTENT_BYTES + 10);
        let capped = cap_response(big);
        assert!(capped.len() < MAX_CONTENT_BYTES + 100);
        assert!(capped.contains("truncated"));
    }
}
