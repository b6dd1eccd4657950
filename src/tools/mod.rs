//! Tools the agent can invoke, and the per-agent registry that holds them.

pub mod builtin;
mod registry;
mod tool;

pub(crate) use registry::failure_message;
pub use registry::{DispatchResult, ToolRegistry, AVAILABLE_BUILTIN_TOOLS};
pub use tool::{Tool, ToolError, ToolOutput, ToolSchema};
