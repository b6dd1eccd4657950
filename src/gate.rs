//! Verify-then-commit gate.
//!
//! Every tool call that reaches the gate produces two audit records:
//!
//! 1. `ToolCallProposed` — appended strictly before anything is shown to
//!    the operator
//! 2. `VerificationDecision` — appended strictly after the operator
//!    responds, before control returns to the loop
//!
//! so a verifiable causal order survives even if the process dies
//! mid-review. The console shows real (unscrubbed) arguments: the operator
//! is an authorized reviewer who needs accurate information. The audit
//! trail receives scrubbed arguments only.
//!
//! Operator-edited arguments must re-pass the tool's declared argument
//! shape and the tool's machine-level precheck before the gate resolves to
//! approved; a mismatch returns to the prompt rather than coercing.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::config::{VerificationConfig, VerificationMode};
use crate::error::Error;
use crate::scrub::scrub_value;
use crate::tools::{Tool, ToolSchema};
use crate::validate::validate_args_shape;

/// What the operator decided for one proposal.
#[derive(Debug, Clone)]
pub enum OperatorChoice {
    Approve,
    Deny,
    /// Approve with revised arguments, subject to re-validation.
    Edit(serde_json::Value),
    /// Review was interrupted (EOF / ^C). Treated as denial.
    Interrupt,
}

/// One proposal as presented for review.
#[derive(Debug)]
pub struct ReviewRequest<'a> {
    pub agent: &'a str,
    pub tool: &'a str,
    pub input: &'a serde_json::Value,
}

/// The human decision point. Implementations may block (stdin); tests use
/// scripted doubles.
pub trait Operator: Send + Sync {
    fn review(&self, request: &ReviewRequest<'_>) -> OperatorChoice;
}

/// Outcome of the gate for one proposal.
#[derive(Debug, Clone)]
pub struct Verification {
    pub approved: bool,
    /// The arguments to execute with (revised if the operator edited).
    pub input: serde_json::Value,
}

/// Per-agent verification gate.
pub struct VerificationGate {
    mode: VerificationMode,
    require_for: HashSet<String>,
    audit: Arc<AuditTrail>,
    operator: Arc<dyn Operator>,
    /// tool name -> declared argument schema, for post-edit re-validation.
    schemas: HashMap<String, serde_json::Value>,
}

impl VerificationGate {
    pub fn new(
        config: &VerificationConfig,
        audit: Arc<AuditTrail>,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            mode: config.mode,
            require_for: config.require_for.iter().cloned().collect(),
            audit,
            operator,
            schemas: HashMap::new(),
        }
    }

    /// Register declared tool contracts (called again after external tools
    /// are discovered).
    pub fn update_schemas(&mut self, schemas: &[ToolSchema]) {
        for schema in schemas {
            self.schemas
                .insert(schema.name.clone(), schema.parameters.clone());
        }
    }

    fn needs_verification(&self, tool_name: &str) -> bool {
        match self.mode {
            VerificationMode::Always => true,
            VerificationMode::Never => false,
            VerificationMode::Selective => self.require_for.contains(tool_name),
        }
    }

    /// Run one proposal through the gate. `tool` carries the precheck used
    /// to re-validate edited arguments; external tools pass `None` and get
    /// shape re-validation only.
    pub async fn review(
        &self,
        agent: &str,
        model: &str,
        tool: Option<&dyn Tool>,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<Verification, Error> {
        // Proposed-event strictly before the operator sees anything.
        self.audit.append(
            AuditEvent::new(AuditEventType::ToolCallProposed)
                .agent(agent)
                .model(model)
                .tool(tool_name)
                .tool_input_scrubbed(scrub_value(&input)),
        )?;

        if !self.needs_verification(tool_name) {
            self.audit.append(
                AuditEvent::new(AuditEventType::VerificationDecision)
                    .agent(agent)
                    .model(model)
                    .tool(tool_name)
                    .verification_choice("auto_approved")
                    .outcome("approved"),
            )?;
            return Ok(Verification {
                approved: true,
                input,
            });
        }

        let (choice, approved, final_input) = loop {
            let request = ReviewRequest {
                agent,
                tool: tool_name,
                input: &input,
            };
            match self.operator.review(&request) {
                OperatorChoice::Approve => break ("y", true, input.clone()),
                OperatorChoice::Deny => break ("n", false, input.clone()),
                OperatorChoice::Interrupt => break ("interrupted", false, input.clone()),
                OperatorChoice::Edit(edited) => {
                    if let Some(schema) = self.schemas.get(tool_name) {
                        if let Err(err) = validate_args_shape(tool_name, &edited, schema) {
                            self.audit.append(
                                AuditEvent::new(AuditEventType::ValidationFailed)
                                    .agent(agent)
                                    .tool(tool_name)
                                    .detail(err.to_string()),
                            )?;
                            eprintln!("Edited args rejected: {err}. Edit again or deny.");
                            continue;
                        }
                    }
                    if let Some(tool) = tool {
                        if let Err(err) = tool.precheck(&edited).await {
                            self.audit.append(
                                AuditEvent::new(AuditEventType::ValidationFailed)
                                    .agent(agent)
                                    .tool(tool_name)
                                    .detail(err.to_string()),
                            )?;
                            eprintln!("Edited args rejected: {err}. Edit again or deny.");
                            continue;
                        }
                    }
                    break ("e", true, edited);
                }
            }
        };

        // Decision-event strictly after the operator responded.
        self.audit.append(
            AuditEvent::new(AuditEventType::VerificationDecision)
                .agent(agent)
                .model(model)
                .tool(tool_name)
                .verification_choice(choice)
                .tool_input_scrubbed(scrub_value(&final_input))
                .outcome(if approved { "approved" } else { "denied" }),
        )?;

        Ok(Verification {
            approved,
            input: final_input,
        })
    }
}

/// Interactive operator reading y/n/e from stdin.
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn review(&self, request: &ReviewRequest<'_>) -> OperatorChoice {
        let args = serde_json::to_string_pretty(request.input)
            .unwrap_or_else(|_| request.input.to_string());
        println!();
        println!("=== Tool Call Verification ===");
        println!("{} wants to call: {}", request.agent, request.tool);
        println!("{args}");

        loop {
            print!("  [y] Approve  [n] Deny  [e] Edit args > ");
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    eprintln!("Interrupted; denying tool call.");
                    return OperatorChoice::Interrupt;
                }
                Ok(_) => {}
            }

            match line.trim().to_lowercase().as_str() {
                "y" => return OperatorChoice::Approve,
                "n" => {
                    println!("Tool call denied.");
                    return OperatorChoice::Deny;
                }
                "e" => match read_edited_args() {
                    Some(edited) => return OperatorChoice::Edit(edited),
                    None => continue,
                },
                _ => println!("Please enter y, n, or e."),
            }
        }
    }
}

/// Read replacement JSON args from stdin, terminated by two blank lines.
fn read_edited_args() -> Option<serde_json::Value> {
    println!("Enter new JSON args (blank line twice to finish):");
    let mut lines: Vec<String> = Vec::new();
    loop {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end_matches('\n').to_string();
        if line.is_empty() && lines.last().is_some_and(|l| l.is_empty()) {
            break;
        }
        lines.push(line);
    }

    let raw = lines.join("\n").trim().to_string();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            eprintln!("Invalid JSON: {e}. Keeping original args.");
            None
        }
    }
}
