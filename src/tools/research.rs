use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolContext};

/// State keys the planner fills and the researchers read.
pub const TOPIC_KEYS: [&str; 3] = ["topic_1", "topic_2", "topic_3"];

/// Stores up to three research topics in session state.
#[derive(Debug, Clone, Default)]
pub struct SetTopicsTool;

#[derive(Debug, Deserialize)]
struct TopicArgs {
    topic_1: String,
    #[serde(default)]
    topic_2: String,
    #[serde(default)]
    topic_3: String,
}

#[async_trait]
impl Tool for SetTopicsTool {
    fn name(&self) -> &str {
        "set_topics"
    }

    fn description(&self) -> &str {
        "Sets up to three research topics in the session state."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "topic_1": {"type": "string"},
                "topic_2": {"type": "string"},
                "topic_3": {"type": "string"}
            },
            "required": ["topic_1"]
        }))
    }

    async fn call(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value> {
        let args: TopicArgs = parse_args(self.name(), input)?;
        let topics = [args.topic_1, args.topic_2, args.topic_3];
        for (key, topic) in TOPIC_KEYS.iter().zip(&topics) {
            ctx.state.insert(*key, topic.clone());
        }
        Ok(Value::String(format!(
            "Topics set: 1) {}; 2) {}; 3) {}",
            topics[0], topics[1], topics[2]
        )))
    }
}
