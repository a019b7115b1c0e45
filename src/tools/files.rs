//! Filesystem tool used by the code pipeline to save its final output.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::{PipelineError, Result};
use crate::tool::{parse_args, Tool, ToolContext};

/// Writes text to a path, creating any missing parent directories.
#[derive(Debug, Clone, Default)]
pub struct WriteToDiskTool {
    root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    filename: String,
    content: String,
}

impl WriteToDiskTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative filenames against `root` instead of the working directory.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Write `content` to `filename` and return the confirmation message.
    pub async fn write(&self, filename: &str, content: &str) -> Result<String> {
        if filename.trim().is_empty() {
            return Err(PipelineError::Protocol("`filename` must not be empty".into()));
        }
        let path = self.resolve(filename);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        tracing::info!(path = %path.display(), bytes = content.len(), "wrote file");
        Ok(format!("Successfully wrote to {filename}"))
    }
}

#[async_trait]
impl Tool for WriteToDiskTool {
    fn name(&self) -> &str {
        "write_to_disk"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating any missing parent directories."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "filename": {"type": "string", "description": "Path of the file to write"},
                "content": {"type": "string", "description": "Text to write"}
            },
            "required": ["filename", "content"]
        }))
    }

    async fn call(&self, input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
        let args: WriteArgs = parse_args(self.name(), input)?;
        let confirmation = self.write(&args.filename, &args.content).await?;
        Ok(Value::String(confirmation))
    }
}
