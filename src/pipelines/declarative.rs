//! Pipelines described in TOML instead of code.
//!
//! ```toml
//! name = "parallel_research"
//!
//! [state]
//! topic_1 = ""
//!
//! [[agents]]
//! name = "research_planner"
//! instruction = "Split the question into topics."
//! tools = ["set_topics"]
//!
//! [root]
//! kind = "sequential"
//! steps = ["research_planner", { kind = "parallel", steps = ["researcher_1"] }]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::agent::LlmAgent;
use crate::callbacks::{ForbiddenArgumentGuard, ForbiddenPhraseGuard, IterationCounter};
use crate::config::ToolsConfig;
use crate::error::{PipelineError, Result};
use crate::llm::LanguageModel;
use crate::runtime::Runner;
use crate::toolkit::builtin_toolkit;
use crate::workflow::WorkflowNode;

const DEFAULT_LOOP_ITERATIONS: usize = 5;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ArgumentGuardSpec {
    pub argument: String,
    pub value: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub instruction: String,
    #[serde(default)]
    pub output_key: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub sub_agents: Vec<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub forbidden_phrase: Option<String>,
    #[serde(default)]
    pub forbidden_argument: Option<ArgumentGuardSpec>,
    /// State key incremented each time the agent starts.
    #[serde(default)]
    pub counter: Option<String>,
    #[serde(default)]
    pub max_steps: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Sequential,
    Parallel,
    Loop,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<TopologySpec>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
}

/// Either the name of an agent or a nested topology node.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TopologySpec {
    Agent(String),
    Node(NodeSpec),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub name: String,
    /// Values pre-seeded into session state before the root runs.
    #[serde(default)]
    pub state: Map<String, Value>,
    pub agents: Vec<AgentSpec>,
    pub root: TopologySpec,
}

impl PipelineConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| PipelineError::Config(format!("Failed to parse pipeline: {err}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Turn the description into a runner whose initial state holds `state`.
    pub fn build(&self, model: Arc<dyn LanguageModel>, tools: &ToolsConfig) -> Result<Runner> {
        let mut specs: HashMap<&str, &AgentSpec> = HashMap::new();
        for spec in &self.agents {
            if specs.insert(spec.name.as_str(), spec).is_some() {
                return Err(PipelineError::Config(format!(
                    "agent `{}` is defined twice",
                    spec.name
                )));
            }
        }

        let builder = Builder {
            specs,
            model,
            tools,
        };
        let root = builder.node(&self.root, &self.name)?;

        let mut runner = Runner::new(self.name.clone(), root);
        for (key, value) in &self.state {
            runner = runner.with_initial_state(key.clone(), value.clone());
        }
        Ok(runner)
    }
}

struct Builder<'a> {
    specs: HashMap<&'a str, &'a AgentSpec>,
    model: Arc<dyn LanguageModel>,
    tools: &'a ToolsConfig,
}

impl<'a> Builder<'a> {
    fn node(&self, spec: &TopologySpec, fallback_name: &str) -> Result<WorkflowNode> {
        match spec {
            TopologySpec::Agent(name) => {
                Ok(WorkflowNode::agent(self.agent(name, &mut Vec::new())?))
            }
            TopologySpec::Node(node) => {
                if node.steps.is_empty() {
                    return Err(PipelineError::Config(format!(
                        "`{fallback_name}` has no steps"
                    )));
                }
                let name = node.name.clone().unwrap_or_else(|| fallback_name.to_string());
                let children = node
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| self.node(step, &format!("{name}_{}", i + 1)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match node.kind {
                    NodeKind::Sequential => WorkflowNode::sequence(name, children),
                    NodeKind::Parallel => WorkflowNode::parallel(name, children),
                    NodeKind::Loop => {
                        let iterations = node.max_iterations.unwrap_or(DEFAULT_LOOP_ITERATIONS);
                        let body = if children.len() == 1 {
                            children.into_iter().next().ok_or_else(|| {
                                PipelineError::Config(format!("`{name}` has no steps"))
                            })?
                        } else {
                            WorkflowNode::sequence(format!("{name}_body"), children)
                        };
                        WorkflowNode::repeat(name, body, iterations)
                    }
                })
            }
        }
    }

    fn agent(&self, name: &str, chain: &mut Vec<String>) -> Result<LlmAgent> {
        if chain.iter().any(|seen| seen == name) {
            return Err(PipelineError::Config(format!(
                "sub-agent cycle: {} -> {name}",
                chain.join(" -> ")
            )));
        }
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("unknown agent `{name}`")))?;

        let mut agent = LlmAgent::new(spec.name.clone(), self.model.clone())
            .with_description(spec.description.clone())
            .with_instruction(spec.instruction.clone())
            .with_tools(builtin_toolkit(spec.tools.as_slice(), self.tools)?);
        if let Some(key) = &spec.output_key {
            agent = agent.with_output_key(key.clone());
        }
        if let Some(schema) = &spec.input_schema {
            agent = agent.with_input_schema(schema.clone());
        }
        if let Some(phrase) = &spec.forbidden_phrase {
            agent = agent.with_hook(Arc::new(ForbiddenPhraseGuard::new(
                phrase.clone(),
                "I'm sorry, I cannot process that request.",
            )));
        }
        if let Some(guard) = &spec.forbidden_argument {
            let reason = guard.reason.clone().unwrap_or_else(|| {
                format!("`{}` may not contain `{}`", guard.argument, guard.value)
            });
            let mut hook =
                ForbiddenArgumentGuard::new(guard.argument.clone(), guard.value.clone(), reason);
            if let Some(tool) = &guard.tool {
                hook = hook.for_tool(tool.clone());
            }
            agent = agent.with_hook(Arc::new(hook));
        }
        if let Some(key) = &spec.counter {
            agent = agent.with_hook(Arc::new(IterationCounter::new(key.clone())));
        }
        if let Some(steps) = spec.max_steps {
            agent = agent.with_max_steps(steps);
        }

        chain.push(spec.name.clone());
        for sub in &spec.sub_agents {
            agent = agent.with_sub_agent(self.agent(sub, chain)?);
        }
        chain.pop();
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::StubModel;

    const RESEARCH: &str = include_str!("../../config/parallel_research.toml");

    #[test]
    fn parses_the_bundled_research_pipeline() {
        let cfg = PipelineConfig::from_toml(RESEARCH).unwrap();
        assert_eq!(cfg.name, "parallel_research");
        assert_eq!(cfg.agents.len(), 5);
        assert_eq!(cfg.state.get("research_2"), Some(&Value::from("No research performed.")));
        match &cfg.root {
            TopologySpec::Node(node) => {
                assert_eq!(node.kind, NodeKind::Sequential);
                assert!(matches!(
                    &node.steps[1],
                    TopologySpec::Node(NodeSpec { kind: NodeKind::Parallel, .. })
                ));
            }
            other => panic!("unexpected root {other:?}"),
        }
    }

    #[tokio::test]
    async fn runs_the_bundled_research_pipeline() {
        let model = StubModel::new(vec![
            json!({
                "action": "call_tool",
                "name": "set_topics",
                "arguments": {"topic_1": "ownership", "topic_2": "lifetimes"}
            })
            .to_string(),
            "Plan: two topics.".into(),
            "Ownership moves values.".into(),
            "Lifetimes bound references.".into(),
            "No research performed.".into(),
            "Summary.".into(),
        ]);
        let runner = PipelineConfig::from_toml(RESEARCH)
            .unwrap()
            .build(model.clone(), &ToolsConfig::default())
            .unwrap();

        let outcome = runner.run("Explain Rust memory safety").await.unwrap();

        assert_eq!(outcome.reply, "Summary.");
        assert_eq!(outcome.state.get_str("topic_1"), Some("ownership"));
        assert_eq!(outcome.state.get_str("research_1"), Some("Ownership moves values."));
        assert_eq!(outcome.state.get_str("research_3"), Some("No research performed."));
        let synth_prompt = &model.requests()[5][0].content;
        assert!(synth_prompt.contains("Lifetimes bound references."));
    }

    #[test]
    fn rejects_unknown_agents_duplicates_and_cycles() {
        let model = StubModel::new(vec![]);
        let cfg = |body: &str| PipelineConfig::from_toml(body).unwrap();

        let unknown = cfg("name='x'\nagents=[]\nroot='ghost'");
        assert!(unknown.build(model.clone(), &ToolsConfig::default()).is_err());

        let twice = cfg(
            "name='x'\nroot='a'\n\
             [[agents]]\nname='a'\ninstruction='i'\n\
             [[agents]]\nname='a'\ninstruction='j'",
        );
        let err = twice.build(model.clone(), &ToolsConfig::default()).unwrap_err();
        assert!(err.to_string().contains("defined twice"));

        let cycle = cfg(
            "name='x'\nroot='a'\n\
             [[agents]]\nname='a'\ninstruction='i'\nsub_agents=['b']\n\
             [[agents]]\nname='b'\ninstruction='j'\nsub_agents=['a']",
        );
        let err = cycle.build(model, &ToolsConfig::default()).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn loop_nodes_and_guards_are_wired() {
        let raw = r#"
name = "loop"

[[agents]]
name = "writer"
instruction = "round {iteration?}"
counter = "iteration"
forbidden_phrase = "bad word"

[root]
kind = "loop"
max_iterations = 3
steps = ["writer"]
"#;
        let model = StubModel::new(vec!["a".into(), "b".into(), "c".into()]);
        let runner = PipelineConfig::from_toml(raw)
            .unwrap()
            .build(model.clone(), &ToolsConfig::default())
            .unwrap();

        let outcome = runner.run("write").await.unwrap();
        assert_eq!(outcome.reply, "c");
        assert_eq!(outcome.state.get_i64("iteration"), Some(3));

        model.push("unused");
        let err = runner.run("a bad word").await.unwrap_err();
        assert!(matches!(err, PipelineError::Rejected { .. }));
    }
}
