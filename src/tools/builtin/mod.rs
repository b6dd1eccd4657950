//! Built-in tools.

mod file;
mod http;
mod shell;

pub use file::{ListDirTool, ReadFileTool, WriteFileTool};
pub use http::FetchUrlTool;
pub use shell::ShellTool;
