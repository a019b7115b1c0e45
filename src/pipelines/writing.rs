use std::sync::Arc;

use crate::agent::LlmAgent;
use crate::callbacks::{IterationCounter, StateDefaults};
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::tools::FinishWritingTool;
use crate::workflow::WorkflowNode;

pub const DEFAULT_MAX_ROUNDS: usize = 5;

const WRITER_INSTRUCTION: &str = "You are a creative writer on revision round {iteration}.

Current draft:
{current_draft}

Critic feedback:
{feedback}

Write the next full draft for the user's request, applying the feedback. Reply with the \
draft only.";

const CRITIC_INSTRUCTION: &str = "You critique creative writing.

Draft:
{current_draft}

If the draft fully satisfies the request, call `finish_writing` with a one-line summary. \
Otherwise reply with specific, actionable feedback.";

pub fn writing_defaults() -> StateDefaults {
    StateDefaults::new()
        .with("current_draft", "No draft yet.")
        .with("feedback", "No feedback yet.")
        .with("iteration", 0)
}

/// Writer and critic alternate until the critic finishes or `max_rounds` pass.
pub fn writing_loop(model: Arc<dyn LanguageModel>, max_rounds: usize) -> WorkflowNode {
    let writer = LlmAgent::new("draft_writer", model.clone())
        .with_description("Writes and revises the draft.")
        .with_instruction(WRITER_INSTRUCTION)
        .with_hook(Arc::new(writing_defaults()))
        .with_hook(Arc::new(IterationCounter::new("iteration")))
        .with_output_key("current_draft");

    let critic = LlmAgent::new("draft_critic", model)
        .with_description("Reviews the draft and decides when it is done.")
        .with_instruction(CRITIC_INSTRUCTION)
        .with_tools(ToolRegistry::new().with(FinishWritingTool))
        .with_hook(Arc::new(writing_defaults()))
        .with_output_key("feedback");

    WorkflowNode::repeat(
        "creative_writing",
        WorkflowNode::sequence(
            "revision_round",
            vec![WorkflowNode::agent(writer), WorkflowNode::agent(critic)],
        ),
        max_rounds,
    )
}
