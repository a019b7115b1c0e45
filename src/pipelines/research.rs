use std::sync::Arc;

use crate::agent::LlmAgent;
use crate::callbacks::StateDefaults;
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::tools::{SetTopicsTool, TOPIC_KEYS};
use crate::workflow::WorkflowNode;

pub const RESEARCH_KEYS: [&str; 3] = ["research_1", "research_2", "research_3"];
pub const NO_RESEARCH: &str = "No research performed.";

const PLANNER_INSTRUCTION: &str = "You plan research. Split the user's question into at most \
three focused topics and call `set_topics` once with them. Then reply with a one-line plan.";

const SYNTHESIZER_INSTRUCTION: &str = "You combine research notes into one answer.

Topic 1 ({topic_1}):
{research_1}

Topic 2 ({topic_2}):
{research_2}

Topic 3 ({topic_3}):
{research_3}

Write a concise, well-structured summary that answers the user's question. Skip topics \
with no research.";

/// Seeds every key the researchers and the synthesiser read.
pub fn research_defaults() -> StateDefaults {
    let mut defaults = StateDefaults::new();
    for key in TOPIC_KEYS {
        defaults = defaults.with(key, "");
    }
    for key in RESEARCH_KEYS {
        defaults = defaults.with(key, NO_RESEARCH);
    }
    defaults
}

fn researcher(
    index: usize,
    model: Arc<dyn LanguageModel>,
    defaults: Arc<StateDefaults>,
) -> LlmAgent {
    let topic_key = TOPIC_KEYS[index];
    LlmAgent::new(format!("researcher_{}", index + 1), model)
        .with_description("Researches a single topic.")
        .with_instruction(format!(
            "You research one topic: {{{topic_key}}}\n\nIf the topic is empty reply exactly: \
             {NO_RESEARCH}\nOtherwise give a short, factual summary with key points."
        ))
        .with_hook(defaults)
        .with_output_key(RESEARCH_KEYS[index])
}

/// Planner -> three researchers in parallel -> synthesiser.
pub fn research_pipeline(model: Arc<dyn LanguageModel>) -> WorkflowNode {
    let defaults = Arc::new(research_defaults());

    let planner = LlmAgent::new("research_planner", model.clone())
        .with_description("Splits a question into research topics.")
        .with_instruction(PLANNER_INSTRUCTION)
        .with_tools(ToolRegistry::new().with(SetTopicsTool))
        .with_hook(defaults.clone())
        .with_output_key("research_plan");

    let researchers = (0..TOPIC_KEYS.len())
        .map(|i| WorkflowNode::agent(researcher(i, model.clone(), defaults.clone())))
        .collect();

    let synthesizer = LlmAgent::new("research_synthesizer", model)
        .with_description("Merges the research into a final answer.")
        .with_instruction(SYNTHESIZER_INSTRUCTION)
        .with_hook(defaults)
        .with_output_key("research_summary");

    WorkflowNode::sequence(
        "parallel_research",
        vec![
            WorkflowNode::agent(planner),
            WorkflowNode::parallel("researchers", researchers),
            WorkflowNode::agent(synthesizer),
        ],
    )
}
