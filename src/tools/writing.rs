use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolContext};

/// Ends the enclosing writing loop.
#[derive(Debug, Clone, Default)]
pub struct FinishWritingTool;

#[derive(Debug, Deserialize)]
struct FinishArgs {
    summary: String,
}

#[async_trait]
impl Tool for FinishWritingTool {
    fn name(&self) -> &str {
        "finish_writing"
    }

    fn description(&self) -> &str {
        "Marks the writing task complete and exits the revision loop."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "A brief summary of the final work"
                }
            },
            "required": ["summary"]
        }))
    }

    async fn call(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value> {
        let args: FinishArgs = parse_args(self.name(), input)?;
        ctx.actions.escalate = true;
        Ok(Value::String(format!("Task completed: {}", args.summary)))
    }
}
