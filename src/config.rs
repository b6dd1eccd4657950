//! Agent definition types.
//!
//! The crate consumes definitions as already-validated structs; the TOML
//! files the binary loads deserialize straight into [`AgentConfig`]. The one
//! semantic check that must happen at load time lives here:
//! [`AgentConfig::check_policy`] rejects definitions whose verification mode
//! is `never` while a high-risk tool is enabled. That combination would let
//! destructive operations run without any human ever seeing them, so it is
//! refused before an agent can be constructed, not at call time.

use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::PolicyError;

/// Tools that must never run without the possibility of human review.
pub const HIGH_RISK_TOOLS: &[&str] = &["shell", "write_file"];

fn default_max_turns() -> u32 {
    20
}

/// One agent definition, immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Filesystem roots the agent may read/write. Empty means the current
    /// working directory, which is logged as a warning at build time.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

impl AgentConfig {
    /// Load-time policy check: `never` mode plus a high-risk built-in tool
    /// is rejected before any instance can be built from this definition.
    pub fn check_policy(&self) -> Result<(), PolicyError> {
        if self.verification.mode != VerificationMode::Never {
            return Ok(());
        }
        let violations: Vec<String> = self
            .tools
            .builtin
            .iter()
            .filter(|t| HIGH_RISK_TOOLS.contains(&t.as_str()))
            .cloned()
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::HighRiskNeverMode {
                agent: self.name.clone(),
                tools: violations,
            })
        }
    }
}

/// Tool enablement for one agent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Names of built-in tools to enable. Unknown names fail construction.
    #[serde(default)]
    pub builtin: Vec<String>,
    /// External tool servers to connect at build time.
    #[serde(default)]
    pub external: Vec<ExternalToolConfig>,
}

/// One external tool server. Only the `local` (spawned subprocess) transport
/// is currently supported; other values are accepted here and rejected with
/// a logged warning at connect time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalToolConfig {
    pub name: String,
    pub transport: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the spawned process. May contain credentials; values
    /// are passed to the subprocess and never written to the audit trail.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// When the operator is asked to review a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    #[default]
    Always,
    Selective,
    Never,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    #[serde(default)]
    pub mode: VerificationMode,
    /// Tool names that require review under `selective` mode.
    #[serde(default)]
    pub require_for: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffConfig {
    /// Agent names this agent may delegate subtasks to.
    #[serde(default)]
    pub can_delegate_to: Vec<String>,
}

/// Model backend selection. Backend choice is a pure function of this value;
/// see `providers::create_provider`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Anthropic {
        #[serde(default)]
        base_url: Option<String>,
        /// Falls back to `ANTHROPIC_API_KEY` when absent.
        #[serde(default)]
        api_key: Option<SecretString>,
    },
    VertexAi {
        project: String,
        #[serde(default = "default_vertex_location")]
        location: String,
    },
}

fn default_vertex_location() -> String {
    "us-central1".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Anthropic {
            base_url: None,
            api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(mode: VerificationMode, builtin: &[&str]) -> AgentConfig {
        AgentConfig {
            name: "test".to_string(),
            description: None,
            model: "claude-sonnet-4-20250514".to_string(),
            system_prompt: "You are a test agent.".to_string(),
            provider: ProviderConfig::default(),
            tools: ToolsConfig {
                builtin: builtin.iter().map(|s| s.to_string()).collect(),
                external: vec![],
            },
            allowed_paths: vec![],
            verification: VerificationConfig {
                mode,
                require_for: vec![],
            },
            handoff: HandoffConfig::default(),
            max_turns: 20,
        }
    }

    #[test]
    fn never_mode_with_shell_is_rejected() {
        let cfg = config_with(VerificationMode::Never, &["shell", "read_file"]);
        assert!(matches!(
            cfg.check_policy(),
            Err(PolicyError::HighRiskNeverMode { .. })
        ));
    }

    #[test]
    fn never_mode_with_write_file_is_rejected() {
        let cfg = config_with(VerificationMode::Never, &["write_file"]);
        assert!(cfg.check_policy().is_err());
    }

    #[test]
    fn never_mode_with_safe_tools_is_accepted() {
        let cfg = config_with(VerificationMode::Never, &["read_file", "list_dir"]);
        assert!(cfg.check_policy().is_ok());
    }

    #[test]
    fn always_mode_with_shell_is_accepted() {
        let cfg = config_with(VerificationMode::Always, &["shell", "write_file"]);
        assert!(cfg.check_policy().is_ok());
    }

    #[test]
    fn parses_toml_definition() {
        let toml = r#"
            name = "researcher"
            model = "claude-sonnet-4-20250514"
            system_prompt = "You research things."
            allowed_paths = ["/tmp/ws"]
            max_turns = 10

            [tools]
            builtin = ["read_file", "fetch_url"]

            [[tools.external]]
            name = "notes"
            transport = "local"
            command = "notes-server"
            args = ["--stdio"]

            [verification]
            mode = "selective"
            require_for = ["fetch_url"]

            [handoff]
            can_delegate_to = ["writer"]
        "#;
        let cfg: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.name, "researcher");
        assert_eq!(cfg.verification.mode, VerificationMode::Selective);
        assert_eq!(cfg.tools.external.len(), 1);
        assert_eq!(cfg.handoff.can_delegate_to, vec!["writer"]);
        assert_eq!(cfg.max_turns, 10);
        assert!(cfg.check_policy().is_ok());
    }
}
