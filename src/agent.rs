//! The agent loop: think, dispatch, observe, repeat.
//!
//! Each turn sends the accumulated conversation plus the tool catalog to
//! the provider. A text-only response terminates the loop; tool-call
//! proposals are dispatched in proposal order through precheck (validator +
//! enforcer) -> verification gate -> registry, and each result, denial, or
//! blocked message is folded back into the conversation as a tool result.
//! Reaching the turn budget without a final text response is a defined
//! terminal state, reported as such, never silently truncated.
//!
//! Audit events emitted here: `AgentTaskStart` before any work,
//! `AgentTaskEnd` on every exit path (with turns used and token totals),
//! and `ToolExecuted` after each successful dispatch. Proposal/decision
//! events belong to the gate; block/denial events to the precheck and
//! registry mapping.

use std::sync::Arc;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::config::AgentConfig;
use crate::error::Error;
use crate::external::ExternalToolHost;
use crate::gate::VerificationGate;
use crate::providers::{
    send_with_retry, ContentBlock, Message, Provider, StopReason, TokenUsage,
};
use crate::scrub::{scrub_str, scrub_value};
use crate::tools::{failure_message, DispatchResult, ToolRegistry, ToolSchema};

/// Max chars of a tool result written to the audit trail.
const AUDIT_RESULT_MAX_CHARS: usize = 500;
/// Max chars of the task echoed into `AgentTaskStart`.
const TASK_SUMMARY_MAX_CHARS: usize = 300;

/// Terminal state of one agent run.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The model produced a final text-only response.
    Completed(String),
    /// The turn budget ran out first. Carries whatever text the last
    /// response contained.
    TurnLimitExceeded { partial: String },
}

impl TaskOutcome {
    pub fn into_text(self) -> String {
        match self {
            TaskOutcome::Completed(text) => text,
            TaskOutcome::TurnLimitExceeded { partial } => partial,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed(_) => "completed",
            TaskOutcome::TurnLimitExceeded { .. } => "turn_limit_exceeded",
        }
    }
}

/// One runtime agent instance: fresh enforcement state, never shared or
/// reused across agents or runs.
pub struct Agent {
    name: String,
    model: String,
    system_prompt: String,
    max_turns: u32,
    registry: ToolRegistry,
    external: ExternalToolHost,
    gate: VerificationGate,
    provider: Box<dyn Provider>,
    audit: Arc<AuditTrail>,
}

impl Agent {
    pub fn new(
        config: &AgentConfig,
        registry: ToolRegistry,
        external: ExternalToolHost,
        gate: VerificationGate,
        provider: Box<dyn Provider>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_turns: config.max_turns,
            registry,
            external,
            gate,
            provider,
            audit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Built-in plus discovered external tool contracts.
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = self.registry.schemas();
        schemas.extend(self.external.schemas());
        schemas
    }

    /// Kill external tool server processes. Call when the instance is done.
    pub async fn shutdown(&mut self) {
        self.external.shutdown().await;
    }

    /// Run the agent on a task, returning the terminal outcome.
    pub async fn run(&mut self, task: &str, context: &str) -> Result<TaskOutcome, Error> {
        self.audit.append(
            AuditEvent::new(AuditEventType::AgentTaskStart)
                .agent(&self.name)
                .model(&self.model)
                .task_summary(scrub_str(&truncate_chars(task, TASK_SUMMARY_MAX_CHARS))),
        )?;

        let mut usage = TokenUsage::default();
        let mut turns_used = 0;
        let result = self.run_inner(task, context, &mut usage, &mut turns_used).await;

        let outcome_label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        let end = self.audit.append(
            AuditEvent::new(AuditEventType::AgentTaskEnd)
                .agent(&self.name)
                .model(&self.model)
                .turns_used(turns_used)
                .tokens(usage.input_tokens, usage.output_tokens)
                .outcome(outcome_label),
        );

        match (result, end) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e.into()),
            (Ok(outcome), Ok(())) => Ok(outcome),
        }
    }

    async fn run_inner(
        &mut self,
        task: &str,
        context: &str,
        usage: &mut TokenUsage,
        turns_used: &mut u32,
    ) -> Result<TaskOutcome, Error> {
        let user_content = if context.is_empty() {
            task.to_string()
        } else {
            format!("Context:\n{context}\n\nTask:\n{task}")
        };
        let mut messages = vec![Message::user(user_content)];

        let tools = self.tool_schemas();
        self.gate.update_schemas(&tools);

        let mut last_text = String::new();
        let mut turn = 0;
        while turn < self.max_turns {
            turn += 1;
            *turns_used = turn;
            tracing::info!(agent = %self.name, turn, max_turns = self.max_turns, "agent turn");

            let response = send_with_retry(
                self.provider.as_mut(),
                &self.system_prompt,
                &messages,
                &tools,
            )
            .await?;
            usage.accumulate(response.usage);
            last_text = response.text();
            messages.push(Message::assistant(response.content.clone()));

            match response.stop_reason {
                StopReason::EndTurn => {
                    return Ok(TaskOutcome::Completed(last_text));
                }
                StopReason::ToolUse => {
                    let results = self.dispatch_proposals(&response.content).await?;
                    messages.push(Message::tool_results(results));
                }
                StopReason::Other(reason) => {
                    tracing::warn!(agent = %self.name, %reason, "unexpected stop reason; ending task");
                    return Ok(TaskOutcome::Completed(last_text));
                }
            }
        }

        tracing::warn!(agent = %self.name, max_turns = self.max_turns, "turn limit reached");
        Ok(TaskOutcome::TurnLimitExceeded { partial: last_text })
    }

    /// Dispatch every proposal in order through the full pipeline, folding
    /// each outcome back as a tool result block.
    async fn dispatch_proposals(
        &mut self,
        content: &[ContentBlock],
    ) -> Result<Vec<ContentBlock>, Error> {
        let mut results = Vec::new();

        for block in content {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };
            let message = self.dispatch_one(name, input).await?;
            results.push(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: message,
            });
        }

        Ok(results)
    }

    async fn dispatch_one(
        &mut self,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<String, Error> {
        let builtin = self.registry.get(name).cloned();
        let is_external = builtin.is_none() && self.external.has_tool(name);
        if builtin.is_none() && !is_external {
            return Ok(format!("Error: unknown tool '{name}'"));
        }

        // Machine-level checks run before the gate sees anything; a
        // rejection here never produces a proposal/decision pair.
        if let Some(tool) = &builtin {
            if let Err(err) = tool.precheck(input).await {
                return failure_message(&self.audit, name, err);
            }
        }

        let verification = self
            .gate
            .review(
                &self.name,
                &self.model,
                builtin.as_deref(),
                name,
                input.clone(),
            )
            .await?;

        if !verification.approved {
            tracing::info!(agent = %self.name, tool = %name, "tool call denied by operator");
            return Ok("Tool call denied by operator.".to_string());
        }

        let dispatch = if builtin.is_some() {
            self.registry
                .call(name, verification.input.clone(), &self.audit)
                .await?
        } else {
            match self.external.call(name, &verification.input).await {
                Ok(content) => DispatchResult::Executed(content),
                Err(err) => DispatchResult::Failed(failure_message(&self.audit, name, err)?),
            }
        };

        if let DispatchResult::Executed(content) = &dispatch {
            self.audit.append(
                AuditEvent::new(AuditEventType::ToolExecuted)
                    .agent(&self.name)
                    .model(&self.model)
                    .tool(name)
                    .tool_input_scrubbed(scrub_value(&verification.input))
                    .outcome("success")
                    .result_summary(scrub_str(&truncate_chars(content, AUDIT_RESULT_MAX_CHARS))),
            )?;
        }

        Ok(dispatch.message().to_string())
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(TaskOutcome::Completed(String::new()).label(), "completed");
        assert_eq!(
            TaskOutcome::TurnLimitExceeded {
                partial: String::new()
            }
            .label(),
            "turn_limit_exceeded"
        );
    }

    #[test]
    fn truncation_is_char_aware() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
