//! Per-agent tool catalog.
//!
//! Tools are instantiated per agent instance so each callable is bound to
//! that agent's own access enforcer. The registry also owns the mapping
//! from tool failures to audit events: an enforcer denial becomes
//! `ToolAccessDenied`, a validator block becomes `ToolBlocked`, and both
//! fold a layer-naming message back into the conversation instead of
//! aborting the loop.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::enforcer::AccessEnforcer;
use crate::error::{Error, PolicyError};
use crate::tools::builtin::{FetchUrlTool, ListDirTool, ReadFileTool, ShellTool, WriteFileTool};
use crate::tools::tool::{Tool, ToolError, ToolSchema};

/// Names of all built-in tools an agent definition may enable.
pub const AVAILABLE_BUILTIN_TOOLS: &[&str] =
    &["read_file", "write_file", "list_dir", "shell", "fetch_url"];

/// Holds the set of tools enabled for a specific agent instance.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("order", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    /// Build a registry containing the named built-in tools, each bound to
    /// the given enforcer. Unknown names fail construction; the definition
    /// was supposed to be validated before this point.
    pub fn builtin(
        agent: &str,
        enabled: &[String],
        enforcer: Arc<AccessEnforcer>,
    ) -> Result<Self, PolicyError> {
        let unknown: Vec<String> = enabled
            .iter()
            .filter(|n| !AVAILABLE_BUILTIN_TOOLS.contains(&n.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(PolicyError::UnknownBuiltinTool {
                agent: agent.to_string(),
                tools: unknown,
            });
        }

        let mut registry = Self {
            tools: HashMap::new(),
            order: Vec::new(),
        };
        for name in enabled {
            let tool: Arc<dyn Tool> = match name.as_str() {
                "read_file" => Arc::new(ReadFileTool::new(Arc::clone(&enforcer))),
                "write_file" => Arc::new(WriteFileTool::new(Arc::clone(&enforcer))),
                "list_dir" => Arc::new(ListDirTool::new(Arc::clone(&enforcer))),
                "shell" => Arc::new(ShellTool::new(Arc::clone(&enforcer))),
                "fetch_url" => Arc::new(FetchUrlTool::new()),
                _ => unreachable!("validated above"),
            };
            registry.add(tool);
        }
        Ok(registry)
    }

    /// Register an extra tool (e.g. the delegate tool injected by the
    /// orchestrator).
    pub fn add(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declared contracts in registration order, for the provider catalog.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.schema())
            .collect()
    }

    /// Execute an already-approved tool call, mapping failures to audit
    /// events and a conversation message.
    pub async fn call(
        &self,
        name: &str,
        args: serde_json::Value,
        audit: &AuditTrail,
    ) -> Result<DispatchResult, Error> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(DispatchResult::Failed(format!("Error: unknown tool '{name}'")));
        };
        match tool.execute(args).await {
            Ok(output) => Ok(DispatchResult::Executed(output.content)),
            Err(err) => failure_message(audit, name, err).map(DispatchResult::Failed),
        }
    }
}

/// Result of one dispatch: whether the tool actually ran, plus the message
/// folded back into the conversation. Only executed dispatches earn a
/// `ToolExecuted` audit event.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    Executed(String),
    Failed(String),
}

impl DispatchResult {
    pub fn message(&self) -> &str {
        match self {
            DispatchResult::Executed(m) | DispatchResult::Failed(m) => m,
        }
    }
}

/// Map a tool failure to its audit event and the message folded into the
/// conversation. Audit write failures abort.
pub(crate) fn failure_message(
    audit: &AuditTrail,
    tool_name: &str,
    err: ToolError,
) -> Result<String, Error> {
    match err {
        ToolError::AccessDenied(detail) => {
            audit.append(
                AuditEvent::new(AuditEventType::ToolAccessDenied)
                    .tool(tool_name)
                    .outcome("access_denied")
                    .detail(&detail),
            )?;
            Ok(format!("Access denied: {detail}"))
        }
        ToolError::Blocked(detail) => {
            audit.append(
                AuditEvent::new(AuditEventType::ToolBlocked)
                    .tool(tool_name)
                    .outcome("blocked")
                    .detail(&detail),
            )?;
            Ok(format!("Tool call blocked by security policy: {detail}"))
        }
        ToolError::AuditFailure(detail) => Err(Error::AuditAbort(detail)),
        other => Ok(format!("Tool '{tool_name}' failed: {other}")),
    }
}
