//! File operation tools, each bound to one agent's access enforcer.
//!
//! Path confinement happens in `precheck` (before the verification gate)
//! and again at execution time against the canonical resolved path, so an
//! approval can never be redirected to a different target.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use crate::enforcer::AccessEnforcer;
use crate::tools::tool::{require_str, Tool, ToolError, ToolOutput};
use crate::validate::check_content_size;

/// Read file contents.
pub struct ReadFileTool {
    enforcer: Arc<AccessEnforcer>,
}

impl ReadFileTool {
    pub fn new(enforcer: Arc<AccessEnforcer>) -> Self {
        Self { enforcer }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. The path must be \
         inside the agent's allowed roots."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute or relative file path"}
            },
            "required": ["path"]
        })
    }

    async fn precheck(&self, params: &serde_json::Value) -> Result<(), ToolError> {
        let path = require_str(params, "path")?;
        self.enforcer.authorize(Path::new(path), "read")?;
        Ok(())
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = require_str(&params, "path")?;
        let resolved = self.enforcer.authorize(Path::new(path), "read")?;

        if !resolved.exists() {
            return Ok(ToolOutput::text(format!("Error: file not found: {path}")));
        }
        if !resolved.is_file() {
            return Ok(ToolOutput::text(format!("Error: not a file: {path}")));
        }
        match fs::read_to_string(&resolved).await {
            Ok(content) => Ok(ToolOutput::text(content)),
            Err(e) => Ok(ToolOutput::text(format!("Error reading file: {e}"))),
        }
    }
}

/// Write content to a file.
pub struct WriteFileTool {
    enforcer: Arc<AccessEnforcer>,
}

impl WriteFileTool {
    pub fn new(enforcer: Arc<AccessEnforcer>) -> Self {
        Self { enforcer }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the agent's allowed roots. Creates \
         parent directories if needed. Overwrites existing files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute or relative file path"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn precheck(&self, params: &serde_json::Value) -> Result<(), ToolError> {
        let path = require_str(params, "path")?;
        let content = require_str(params, "content")?;
        check_content_size(content, "content")?;
        self.enforcer.authorize(Path::new(path), "write")?;
        Ok(())
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = require_str(&params, "path")?;
        let content = require_str(&params, "content")?;
        check_content_size(content, "content")?;
        let resolved = self.enforcer.authorize(Path::new(path), "write")?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("creating directories: {e}")))?;
        }
        fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("writing file: {e}")))?;

        Ok(ToolOutput::text(format!(
            "Successfully wrote {} bytes to {path}",
            content.len()
        )))
    }
}

/// List directory contents.
pub struct ListDirTool {
    enforcer: Arc<AccessEnforcer>,
}

impl ListDirTool {
    pub fn new(enforcer: Arc<AccessEnforcer>) -> Self {
        Self { enforcer }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory inside the agent's allowed roots."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path (default: first allowed root)"
                }
            },
            "required": []
        })
    }

    async fn precheck(&self, params: &serde_json::Value) -> Result<(), ToolError> {
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        self.enforcer.authorize(Path::new(path), "list")?;
        Ok(())
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = self.enforcer.authorize(Path::new(path), "list")?;

        if !resolved.exists() {
            return Ok(ToolOutput::text(format!("Error: path not found: {path}")));
        }
        if !resolved.is_dir() {
            return Ok(ToolOutput::text(format!("Error: not a directory: {path}")));
        }

        let mut dir = fs::read_dir(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("reading directory: {e}")))?;

        let mut entries: Vec<(bool, String)> = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("reading entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().await.ok();
            let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());
            let line = if is_dir {
                format!("[DIR]  {name}/")
            } else {
                let size = meta.map(|m| m.len()).unwrap_or(0);
                format!("[FILE] {name} ({size} bytes)")
            };
            entries.push((is_dir, line));
        }

        // Directories first, then lexical
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let lines: Vec<String> = entries.into_iter().map(|(_, l)| l).collect();

        Ok(ToolOutput::text(if lines.is_empty() {
            "(empty directory)".to_string()
        } else {
            lines.join("\n")
        }))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn enforcer(dir: &TempDir) -> Arc<AccessEnforcer> {
        Arc::new(AccessEnforcer::new(vec![dir.path().to_path_buf()], vec![]).unwrap())
    }

    #[tokio::test]
    async fn read_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "line 1\nline 2\n").unwrap();
        let tool = ReadFileTool::new(enforcer(&dir));

        let params = serde_json::json!({"path": dir.path().join("a.txt")});
        tool.precheck(&params).await.unwrap();
        let out = tool.execute(params).await.unwrap();
        assert_eq!(out.content, "line 1\nline 2\n");
    }

    #[tokio::test]
    async fn read_outside_root_is_denied_at_precheck() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFileTool::new(enforcer(&dir));

        let params = serde_json::json!({"path": "/etc/passwd"});
        assert!(matches!(
            tool.precheck(&params).await,
            Err(ToolError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn write_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFileTool::new(enforcer(&dir));

        let target = dir.path().join("deep/nested/out.txt");
        let params = serde_json::json!({"path": &target, "content": "hello"});
        tool.precheck(&params).await.unwrap();
        let out = tool.execute(params).await.unwrap();
        assert!(out.content.contains("5 bytes"));
        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_traversal_is_denied() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFileTool::new(enforcer(&dir));

        let params = serde_json::json!({
            "path": dir.path().join("../evil.txt"),
            "content": "x"
        });
        assert!(matches!(
            tool.precheck(&params).await,
            Err(ToolError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn list_dir_marks_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let tool = ListDirTool::new(enforcer(&dir));

        let out = tool
            .execute(serde_json::json!({"path": dir.path()}))
            .await
            .unwrap();
        let lines: Vec<&str> = out.content.lines().collect();
        assert_eq!(lines[0], "[DIR]  sub/");
        assert!(lines[1].starts_with("[FILE] f.txt"));
    }
}
