use std::sync::Arc;
use std::time::Duration;

use crate::config::ToolsConfig;
use crate::error::{PipelineError, Result};
use crate::tool::{Tool, ToolRegistry};
use crate::tools::{
    CapitalCityTool, FinishWritingTool, SetTopicsTool, StockPriceTool, WeatherTool,
    WriteToDiskTool, YahooFinance,
};

/// Names accepted by [`builtin_tool`].
pub const BUILTIN_TOOLS: [&str; 6] = [
    "write_to_disk",
    "get_stock_prices",
    "get_weather",
    "set_topics",
    "get_capital_city",
    "finish_writing",
];

/// Instantiate a built-in tool by name.
pub fn builtin_tool(name: &str, cfg: &ToolsConfig) -> Result<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        "write_to_disk" => Arc::new(WriteToDiskTool::rooted_at(cfg.output_dir.clone())),
        "get_stock_prices" => {
            let source = YahooFinance::new(
                cfg.market_data_url.clone(),
                Duration::from_secs(cfg.http_timeout_secs),
            )?;
            Arc::new(StockPriceTool::new(Arc::new(source)))
        }
        "get_weather" => Arc::new(WeatherTool),
        "set_topics" => Arc::new(SetTopicsTool),
        "get_capital_city" => Arc::new(CapitalCityTool),
        "finish_writing" => Arc::new(FinishWritingTool),
        other => {
            return Err(PipelineError::Config(format!(
                "unknown tool `{other}`; expected one of {}",
                BUILTIN_TOOLS.join(", ")
            )))
        }
    };
    Ok(tool)
}

/// Registry holding the named built-in tools.
pub fn builtin_toolkit<S: AsRef<str>>(names: &[S], cfg: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for name in names {
        registry.register_shared(builtin_tool(name.as_ref(), cfg)?);
    }
    Ok(registry)
}
