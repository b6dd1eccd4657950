//! Orchestrator: builds isolated agent instances and wires delegation.
//!
//! Every build produces fresh enforcement state — a new access enforcer
//! (with the audit log directory injected into its protected dirs), a new
//! gate, a new registry, a new provider. Nothing is cached or shared
//! between builds, so no agent can inherit another's authorized scope.
//!
//! Delegation: an agent whose definition lists delegation targets gets an
//! injected `delegate` tool. Invoking it goes through the same pipeline as
//! any other tool, appends `AgentHandoff`, builds a fresh instance of the
//! target definition, runs its loop to completion on the same session and
//! audit trail, and returns its final text as the tool result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::agent::Agent;
use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::config::{AgentConfig, ProviderConfig};
use crate::enforcer::AccessEnforcer;
use crate::error::{Error, ProviderError};
use crate::external::ExternalToolHost;
use crate::gate::{Operator, VerificationGate};
use crate::providers::{create_provider, Provider};
use crate::scrub::scrub_str;
use crate::tools::{Tool, ToolError, ToolOutput, ToolRegistry};

/// Builds one backend per agent instance. The default is
/// [`create_provider`]; tests substitute scripted backends.
pub type ProviderFactory =
    dyn Fn(&ProviderConfig, &str) -> Result<Box<dyn Provider>, ProviderError> + Send + Sync;

pub struct Orchestrator {
    agents_dir: PathBuf,
    configs: RwLock<HashMap<String, AgentConfig>>,
    audit: Arc<AuditTrail>,
    operator: Arc<dyn Operator>,
    provider_factory: Box<ProviderFactory>,
}

impl Orchestrator {
    pub fn new(
        agents_dir: impl Into<PathBuf>,
        audit: Arc<AuditTrail>,
        operator: Arc<dyn Operator>,
    ) -> Arc<Self> {
        Self::with_provider_factory(agents_dir, audit, operator, Box::new(create_provider))
    }

    /// Construct with a custom backend factory.
    pub fn with_provider_factory(
        agents_dir: impl Into<PathBuf>,
        audit: Arc<AuditTrail>,
        operator: Arc<dyn Operator>,
        provider_factory: Box<ProviderFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agents_dir: agents_dir.into(),
            configs: RwLock::new(HashMap::new()),
            audit,
            operator,
            provider_factory,
        })
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Register an already-built definition, enforcing the load-time policy
    /// check.
    pub fn insert_config(&self, config: AgentConfig) -> Result<(), Error> {
        config.check_policy()?;
        self.configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(config.name.clone(), config);
        Ok(())
    }

    /// Load, policy-check, and cache one agent definition file.
    pub fn load_agent_file(&self, path: &Path) -> Result<AgentConfig, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AgentConfig = toml::from_str(&raw).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.insert_config(config.clone())?;
        tracing::debug!(agent = %config.name, path = %path.display(), "loaded agent definition");
        Ok(config)
    }

    /// Load every `*.toml` definition in the agents directory. Individual
    /// failures are warnings, not fatal.
    pub fn load_agents_dir(&self) {
        let Ok(entries) = std::fs::read_dir(&self.agents_dir) else {
            return;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();
        for path in paths {
            if let Err(e) = self.load_agent_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to load agent definition");
            }
        }
    }

    pub fn config(&self, name: &str) -> Option<AgentConfig> {
        self.configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Build a fully isolated agent instance from a definition. Called per
    /// task invocation and per delegation; never cached.
    pub async fn build_agent(self: Arc<Self>, config: &AgentConfig) -> Result<Agent, Error> {
        config.check_policy()?;

        // The audit directory is protected for every agent, regardless of
        // its allowed roots.
        let audit_dir = self.audit.log_dir().to_path_buf();
        let enforcer = Arc::new(
            AccessEnforcer::from_config(&config.allowed_paths, vec![audit_dir]).map_err(|e| {
                Error::Enforcer {
                    agent: config.name.clone(),
                    reason: e.to_string(),
                }
            })?,
        );

        let mut registry =
            ToolRegistry::builtin(&config.name, &config.tools.builtin, Arc::clone(&enforcer))?;

        if !config.handoff.can_delegate_to.is_empty() {
            registry.add(Arc::new(DelegateTool {
                orchestrator: Arc::clone(&self),
                parent: config.name.clone(),
                allowed: config.handoff.can_delegate_to.clone(),
            }));
        }

        let mut external = ExternalToolHost::new();
        external
            .connect_all(&config.tools.external, &self.audit)
            .await?;

        let gate = VerificationGate::new(
            &config.verification,
            Arc::clone(&self.audit),
            Arc::clone(&self.operator),
        );

        let provider = (self.provider_factory)(&config.provider, &config.model)?;

        Ok(Agent::new(
            config,
            registry,
            external,
            gate,
            provider,
            Arc::clone(&self.audit),
        ))
    }

    /// Run a task on a named, already-loaded agent.
    pub async fn run_task(
        self: Arc<Self>,
        agent_name: &str,
        task: &str,
        context: &str,
    ) -> Result<String, Error> {
        let config = self.config(agent_name).ok_or_else(|| Error::UnknownAgent {
            name: agent_name.to_string(),
        })?;
        let mut agent = Arc::clone(&self).build_agent(&config).await?;
        let result = agent.run(task, context).await;
        agent.shutdown().await;
        result.map(|outcome| outcome.into_text())
    }

    /// Load a definition file and immediately run a task on it.
    pub async fn run_from_file(
        self: Arc<Self>,
        path: &Path,
        task: &str,
        context: &str,
    ) -> Result<String, Error> {
        let config = self.load_agent_file(path)?;
        self.run_task(&config.name, task, context).await
    }
}

/// Injected tool that runs a sub-agent to completion and returns its final
/// text. The sub-agent shares the session identifier through the shared
/// audit trail, never enforcement state.
struct DelegateTool {
    orchestrator: Arc<Orchestrator>,
    parent: String,
    allowed: Vec<String>,
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a subtask to a specialized agent. Returns the agent's \
         final response as a string."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string", "description": "Name of the agent to delegate to"},
                "task": {"type": "string", "description": "Clear description of the subtask"},
                "context": {"type": "string", "description": "Relevant context for the sub-agent"}
            },
            "required": ["agent", "task"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let agent = params
            .get("agent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidParameters("missing 'agent' parameter".to_string()))?
            .to_string();
        let task = params
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidParameters("missing 'task' parameter".to_string()))?
            .to_string();
        let context = params
            .get("context")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if !self.allowed.contains(&agent) {
            return Ok(ToolOutput::text(format!(
                "Error: agent '{agent}' is not in the allowed delegation list: {:?}",
                self.allowed
            )));
        }

        if self.orchestrator.config(&agent).is_none() {
            let candidate = self.orchestrator.agents_dir.join(format!("{agent}.toml"));
            if candidate.exists() {
                self.orchestrator
                    .load_agent_file(&candidate)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            } else {
                return Ok(ToolOutput::text(format!(
                    "Error: agent definition '{agent}' not found"
                )));
            }
        }

        let summary: String = task.chars().take(200).collect();
        self.orchestrator
            .audit
            .append(
                AuditEvent::new(AuditEventType::AgentHandoff)
                    .agent(&self.parent)
                    .tool("delegate")
                    .outcome(format!("delegating_to:{agent}"))
                    .task_summary(scrub_str(&summary)),
            )
            .map_err(|e| ToolError::AuditFailure(e.to_string()))?;

        tracing::info!(parent = %self.parent, target = %agent, "agent handoff");

        match Arc::clone(&self.orchestrator)
            .run_task(&agent, &task, &context)
            .await
        {
            Ok(text) => Ok(ToolOutput::text(text)),
            // An audit failure inside the sub-agent must abort the parent
            // run too; everything else folds in as a tool failure.
            Err(Error::Audit(e)) => Err(ToolError::AuditFailure(e.to_string())),
            Err(Error::AuditAbort(m)) => Err(ToolError::AuditFailure(m)),
            Err(other) => Ok(ToolOutput::text(format!(
                "Delegated agent '{agent}' failed: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::{
        HandoffConfig, ProviderConfig, ToolsConfig, VerificationConfig, VerificationMode,
    };
    use crate::gate::{OperatorChoice, ReviewRequest};
    use crate::session::SessionContext;

    use super::*;

    struct ApproveAll;

    impl Operator for ApproveAll {
        fn review(&self, _request: &ReviewRequest<'_>) -> OperatorChoice {
            OperatorChoice::Approve
        }
    }

    fn test_config(name: &str, ws: &Path) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            description: None,
            model: "claude-sonnet-4-20250514".to_string(),
            system_prompt: "You are a test agent.".to_string(),
            provider: ProviderConfig::default(),
            tools: ToolsConfig {
                builtin: vec!["read_file".to_string()],
                external: vec![],
            },
            allowed_paths: vec![ws.to_path_buf()],
            verification: VerificationConfig {
                mode: VerificationMode::Always,
                require_for: vec![],
            },
            handoff: HandoffConfig::default(),
            max_turns: 5,
        }
    }

    fn orchestrator(audit_dir: &Path) -> Arc<Orchestrator> {
        let audit = Arc::new(AuditTrail::new(audit_dir, &SessionContext::new(None)).unwrap());
        Orchestrator::new("agents", audit, Arc::new(ApproveAll))
    }

    #[test]
    fn policy_violation_blocks_registration() {
        let dir = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let orch = orchestrator(dir.path());

        let mut config = test_config("rogue", ws.path());
        config.tools.builtin = vec!["shell".to_string()];
        config.verification.mode = VerificationMode::Never;

        assert!(matches!(orch.insert_config(config), Err(Error::Policy(_))));
    }

    #[tokio::test]
    async fn builds_are_isolated() {
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let dir = TempDir::new().unwrap();
        let ws_a = TempDir::new().unwrap();
        let ws_b = TempDir::new().unwrap();
        let orch = orchestrator(dir.path());

        let agent_a = Arc::clone(&orch)
            .build_agent(&test_config("a", ws_a.path()))
            .await
            .unwrap();
        let agent_b = Arc::clone(&orch)
            .build_agent(&test_config("b", ws_b.path()))
            .await
            .unwrap();

        // Distinct instances with their own tool sets; nothing shared.
        assert_eq!(agent_a.tool_schemas().len(), 1);
        assert_eq!(agent_b.tool_schemas().len(), 1);
        assert_ne!(agent_a.name(), agent_b.name());
    }

    #[tokio::test]
    async fn delegate_tool_is_injected_for_handoff_configs() {
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let dir = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let orch = orchestrator(dir.path());

        let mut config = test_config("lead", ws.path());
        config.handoff.can_delegate_to = vec!["helper".to_string()];

        let agent = Arc::clone(&orch).build_agent(&config).await.unwrap();
        let names: Vec<String> = agent.tool_schemas().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"delegate".to_string()));
    }

    #[tokio::test]
    async fn delegation_outside_allowlist_is_refused() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(dir.path());

        let tool = DelegateTool {
            orchestrator: Arc::clone(&orch),
            parent: "lead".to_string(),
            allowed: vec!["helper".to_string()],
        };

        let out = tool
            .execute(serde_json::json!({"agent": "villain", "task": "do a thing"}))
            .await
            .unwrap();
        assert!(out.content.contains("not in the allowed delegation list"));
    }

    #[test]
    fn loads_definitions_from_toml() {
        let dir = TempDir::new().unwrap();
        let agents_dir = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();

        std::fs::write(
            agents_dir.path().join("writer.toml"),
            format!(
                r#"
name = "writer"
model = "claude-sonnet-4-20250514"
system_prompt = "You write."
allowed_paths = ["{}"]

[tools]
builtin = ["read_file", "write_file"]
"#,
                ws.path().display()
            ),
        )
        .unwrap();

        let audit = Arc::new(AuditTrail::new(dir.path(), &SessionContext::new(None)).unwrap());
        let orch = Orchestrator::new(agents_dir.path(), audit, Arc::new(ApproveAll));
        orch.load_agents_dir();

        assert!(orch.config("writer").is_some());
    }
}
