use std::sync::Arc;
use std::time::Duration;

use crate::agent::LlmAgent;
use crate::callbacks::CurrentDate;
use crate::config::ToolsConfig;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::tools::{MarketData, StockPriceTool, YahooFinance};
use crate::workflow::WorkflowNode;

const INSTRUCTION: &str = "You report stock performance. Today is {today}.

Work out the ticker symbols and the start date the user means (end date defaults to \
today), call `get_stock_prices`, then report each ticker's start and end close and the \
percentage change. Mention any ticker that returned an error.";

/// Single agent backed by Yahoo Finance.
pub fn stock_agent(model: Arc<dyn LanguageModel>, tools: &ToolsConfig) -> Result<WorkflowNode> {
    let source = YahooFinance::new(
        tools.market_data_url.clone(),
        Duration::from_secs(tools.http_timeout_secs),
    )?;
    Ok(stock_agent_with(model, Arc::new(source)))
}

/// Same agent over any market-data source.
pub fn stock_agent_with(
    model: Arc<dyn LanguageModel>,
    source: Arc<dyn MarketData>,
) -> WorkflowNode {
    let agent = LlmAgent::new("stock_agent", model)
        .with_description("Looks up closing prices for stock tickers.")
        .with_instruction(INSTRUCTION)
        .with_tools(ToolRegistry::new().with(StockPriceTool::new(source)))
        .with_hook(Arc::new(CurrentDate::new("today")))
        .with_output_key("stock_report");
    WorkflowNode::agent(agent)
}
