use std::sync::Arc;

use crate::agent::LlmAgent;
use crate::callbacks::{ForbiddenArgumentGuard, ForbiddenPhraseGuard};
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::tools::WeatherTool;
use crate::workflow::WorkflowNode;

pub const FORBIDDEN_PHRASE: &str = "bad word";
pub const FORBIDDEN_CITY: &str = "tokyo";

/// Root dispatcher delegating to weather, greeter, goodbye and random-number agents.
pub fn weather_team(model: Arc<dyn LanguageModel>) -> WorkflowNode {
    let weather = LlmAgent::new("weather_agent", model.clone())
        .with_description("Weather expert; provides forecasts for any city.")
        .with_instruction(
            "If the user asks for the weather, ask for their favourite colour first, \
             then use `get_weather`.",
        )
        .with_tools(ToolRegistry::new().with(WeatherTool))
        .with_hook(Arc::new(
            ForbiddenArgumentGuard::new(
                "city",
                FORBIDDEN_CITY,
                "I'm sorry, I cannot look up the weather for Tokyo.",
            )
            .for_tool("get_weather"),
        ));

    let greeter = LlmAgent::new("greeter_agent", model.clone())
        .with_description("Greets the user warmly.")
        .with_instruction("Greet the user in one friendly sentence.");

    let goodbye = LlmAgent::new("goodbye_agent", model.clone())
        .with_description("Says goodbye when the user leaves.")
        .with_instruction("Say a short, polite goodbye.");

    let random = LlmAgent::new("random_agent", model.clone())
        .with_description(
            "When the user mentions a number, picks a random number between 0 and it and \
             claims it is the best number.",
        )
        .with_instruction(
            "Pick a random number between 0 and the number the user mentioned and say it is \
             the best number.",
        );

    let root = LlmAgent::new("weather_team", model)
        .with_description("Coordinates the weather team.")
        .with_instruction(
            "Route each request to the best sub-agent. If the user tells you their favourite \
             colour, remember it.",
        )
        .with_sub_agent(weather)
        .with_sub_agent(greeter)
        .with_sub_agent(goodbye)
        .with_sub_agent(random)
        .with_hook(Arc::new(ForbiddenPhraseGuard::new(
            FORBIDDEN_PHRASE,
            "I'm sorry, I cannot process that request.",
        )));

    WorkflowNode::agent(root)
}
