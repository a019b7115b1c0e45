use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::state::SessionState;

/// Side effects a tool asks the calling agent to perform once it returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolActions {
    /// End the enclosing loop after this agent finishes.
    pub escalate: bool,
    /// Hand the conversation to the named sub-agent.
    pub transfer_to: Option<String>,
}

/// Everything a tool may touch while it runs.
pub struct ToolContext<'a> {
    pub state: &'a mut SessionState,
    pub agent_name: &'a str,
    pub actions: ToolActions,
}

impl<'a> ToolContext<'a> {
    pub fn new(state: &'a mut SessionState, agent_name: &'a str) -> Self {
        Self {
            state,
            agent_name,
            actions: ToolActions::default(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Optionally return a JSON Schema-like object describing the expected arguments.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value>;
}

/// Static description of a tool that can be embedded in prompts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

type ToolFn = dyn Fn(Value, &mut ToolContext<'_>) -> Result<Value> + Send + Sync;

/// Adapts a plain synchronous function into a [`Tool`].
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Option<Value>,
    func: Arc<ToolFn>,
}

impl FunctionTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, &mut ToolContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
            func: Arc::new(func),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        self.parameters.clone()
    }

    async fn call(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value> {
        (self.func)(input, ctx)
    }
}

/// Decode tool arguments into a typed struct, reporting the tool name on failure.
pub fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, input: Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|err| PipelineError::Protocol(format!("invalid arguments for `{tool}`: {err}")))
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    pub fn merge(&mut self, other: ToolRegistry) {
        self.tools.extend(other.tools);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    pub async fn call(&self, name: &str, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| PipelineError::ToolNotFound(name.to_string()))?;
        tool.call(input, ctx)
            .await
            .map_err(|source| PipelineError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(source),
            })
    }
}
