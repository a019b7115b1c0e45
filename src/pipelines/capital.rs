use std::sync::Arc;

use serde_json::json;

use crate::agent::LlmAgent;
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::tools::CapitalCityTool;
use crate::workflow::WorkflowNode;

const INSTRUCTION: &str = r#"You provide the capital city of a country using a tool.
The user sends the country as JSON like {"country": "country_name"}.
1. Extract the country name.
2. Call `get_capital_city` with it.
3. Reply clearly with the capital the tool returned."#;

/// Tool-backed capital lookup taking `{"country": ..}` input.
pub fn capital_agent(model: Arc<dyn LanguageModel>) -> WorkflowNode {
    let agent = LlmAgent::new("capital_agent_tool", model)
        .with_description("Retrieves the capital city using a specific tool.")
        .with_instruction(INSTRUCTION)
        .with_tools(ToolRegistry::new().with(CapitalCityTool))
        .with_input_schema(json!({
            "type": "object",
            "properties": {"country": {"type": "string"}},
            "required": ["country"]
        }))
        .with_output_key("capital_tool_result");
    WorkflowNode::agent(agent)
}
