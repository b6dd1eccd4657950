//! Verified agent orchestration.
//!
//! Agents are model-driven actors with a bounded tool set and resource
//! scope. Because tool calls are irreversible, every call passes through a
//! policy-and-audit pipeline before it executes:
//!
//! ```text
//! orchestrator -> agent loop -> provider adapter (model call)
//!              -> input validator -> access enforcer
//!              -> verification gate (audit + human decision)
//!              -> tool registry (execution)
//!              -> result folded back into the conversation
//! ```
//!
//! Security invariants carried by this crate:
//! - no tool executes without either an operator approval or a
//!   definitional auto-approval, both leaving a proposal/decision pair in
//!   the audit trail;
//! - machine-level validation (SSRF, command blocklist, size and timeout
//!   caps) runs before the gate, so human review can never authorize an
//!   unconditionally-forbidden action;
//! - every agent instance owns fresh enforcement state, and the audit log
//!   directory is a protected path for all of them;
//! - a failed audit append aborts the run: nothing happens un-audited.

pub mod agent;
pub mod audit;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod external;
pub mod gate;
pub mod orchestrator;
pub mod providers;
pub mod scrub;
pub mod session;
pub mod tools;
pub mod validate;

pub use agent::{Agent, TaskOutcome};
pub use audit::{AuditEvent, AuditEventType, AuditTrail};
pub use config::{AgentConfig, VerificationMode};
pub use enforcer::AccessEnforcer;
pub use error::Error;
pub use gate::{ConsoleOperator, Operator, OperatorChoice, VerificationGate};
pub use orchestrator::{Orchestrator, ProviderFactory};
pub use session::SessionContext;
