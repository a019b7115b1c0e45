//! The agent configurations: prompts, output keys, topology and hooks.

use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::error::{PipelineError, Result};
use crate::llm::LanguageModel;
use crate::runtime::Runner;

pub mod capital;
pub mod code;
pub mod declarative;
pub mod research;
pub mod stock;
pub mod weather;
pub mod writing;

pub use capital::capital_agent;
pub use code::code_pipeline;
pub use declarative::{AgentSpec, PipelineConfig, TopologySpec};
pub use research::research_pipeline;
pub use stock::stock_agent;
pub use weather::weather_team;
pub use writing::writing_loop;

/// Names accepted by [`by_name`].
pub const PIPELINES: [&str; 6] = [
    "code",
    "research",
    "weather",
    "stock",
    "capital",
    "writing",
];

/// Build the runner for one of the bundled pipelines.
pub fn by_name(name: &str, model: Arc<dyn LanguageModel>, tools: &ToolsConfig) -> Result<Runner> {
    let runner = match name {
        "code" => Runner::new("code_pipeline", code_pipeline(model, tools)),
        "research" => Runner::new("parallel_research", research_pipeline(model)),
        "weather" => Runner::new("weather_team", weather_team(model)),
        "stock" => Runner::new("stock_agent", stock_agent(model, tools)?),
        "capital" => Runner::new("capital_agent", capital_agent(model)),
        "writing" => Runner::new(
            "creative_writing",
            writing_loop(model, writing::DEFAULT_MAX_ROUNDS),
        ),
        other => {
            return Err(PipelineError::Config(format!(
                "unknown pipeline `{other}`; expected one of {}",
                PIPELINES.join(", ")
            )))
        }
    };
    Ok(runner)
}
