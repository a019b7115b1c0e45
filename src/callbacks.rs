//! Hooks that run around agents, model calls and tool calls.
//!
//! A hook that returns `Err` aborts the run; the runner does not retry.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::llm::ModelCompletion;
use crate::message::{Message, Role, ToolCall, ToolResult};
use crate::state::SessionState;

/// The agent and session a hook is invoked for.
pub struct CallbackContext<'a> {
    pub agent_name: &'a str,
    pub state: &'a mut SessionState,
}

impl<'a> CallbackContext<'a> {
    pub fn new(agent_name: &'a str, state: &'a mut SessionState) -> Self {
        Self { agent_name, state }
    }
}

#[async_trait]
pub trait AgentHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_agent(&self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn after_agent(&self, _ctx: &mut CallbackContext<'_>, _reply: &str) -> Result<()> {
        Ok(())
    }

    async fn before_model(&self, _ctx: &CallbackContext<'_>, _request: &[Message]) -> Result<()> {
        Ok(())
    }

    async fn after_model(
        &self,
        _ctx: &CallbackContext<'_>,
        _completion: &ModelCompletion,
    ) -> Result<()> {
        Ok(())
    }

    async fn before_tool(&self, _ctx: &CallbackContext<'_>, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool(&self, _ctx: &CallbackContext<'_>, _result: &ToolResult) -> Result<()> {
        Ok(())
    }
}

fn contains(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Rejects a model call when the latest user message contains a forbidden phrase.
pub struct ForbiddenPhraseGuard {
    phrase: String,
    reason: String,
    case_sensitive: bool,
}

impl ForbiddenPhraseGuard {
    pub fn new(phrase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            reason: reason.into(),
            case_sensitive: true,
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn check(&self, text: &str) -> Result<()> {
        if contains(text, &self.phrase, self.case_sensitive) {
            tracing::warn!(guard = "forbidden_phrase", phrase = %self.phrase, "request rejected");
            return Err(PipelineError::rejected(self.name(), self.reason.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentHook for ForbiddenPhraseGuard {
    fn name(&self) -> &str {
        "forbidden_phrase"
    }

    async fn before_model(&self, _ctx: &CallbackContext<'_>, request: &[Message]) -> Result<()> {
        match request.iter().rev().find(|m| m.role == Role::User) {
            Some(latest) => self.check(&latest.content),
            None => Ok(()),
        }
    }
}

/// Rejects a tool call whose string argument contains a forbidden value.
pub struct ForbiddenArgumentGuard {
    argument: String,
    forbidden: String,
    reason: String,
    tools: Vec<String>,
}

impl ForbiddenArgumentGuard {
    pub fn new(
        argument: impl Into<String>,
        forbidden: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            argument: argument.into(),
            forbidden: forbidden.into(),
            reason: reason.into(),
            tools: Vec::new(),
        }
    }

    /// Only inspect calls to the named tool. Without this every tool is checked.
    pub fn for_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn check(&self, call: &ToolCall) -> Result<()> {
        if !self.tools.is_empty() && !self.tools.iter().any(|t| t == &call.name) {
            return Ok(());
        }
        let value = call
            .arguments
            .get(&self.argument)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if contains(value, &self.forbidden, false) {
            tracing::warn!(
                guard = "forbidden_argument",
                tool = %call.name,
                argument = %self.argument,
                "tool call rejected"
            );
            return Err(PipelineError::rejected(self.name(), self.reason.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentHook for ForbiddenArgumentGuard {
    fn name(&self) -> &str {
        "forbidden_argument"
    }

    async fn before_tool(&self, _ctx: &CallbackContext<'_>, call: &ToolCall) -> Result<()> {
        self.check(call)
    }
}

/// Seeds placeholder values for keys a later instruction template reads.
#[derive(Default)]
pub struct StateDefaults {
    defaults: Vec<(String, Value)>,
}

impl StateDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.push((key.into(), value.into()));
        self
    }

    pub fn apply(&self, state: &mut SessionState) {
        for (key, value) in &self.defaults {
            if state.ensure(key.clone(), value.clone()) {
                tracing::debug!(key = %key, "seeded state default");
            }
        }
    }
}

#[async_trait]
impl AgentHook for StateDefaults {
    fn name(&self) -> &str {
        "state_defaults"
    }

    async fn before_agent(&self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        self.apply(ctx.state);
        Ok(())
    }
}

/// Writes today's UTC date (`%Y-%m-%d`) under `key` every time the owning agent starts.
pub struct CurrentDate {
    key: String,
}

impl CurrentDate {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl AgentHook for CurrentDate {
    fn name(&self) -> &str {
        "current_date"
    }

    async fn before_agent(&self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        ctx.state.insert(self.key.clone(), today);
        Ok(())
    }
}

/// Increments an integer state key every time the owning agent starts.
pub struct IterationCounter {
    key: String,
}

impl IterationCounter {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl AgentHook for IterationCounter {
    fn name(&self) -> &str {
        "iteration_counter"
    }

    async fn before_agent(&self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        let next = ctx.state.get_i64(&self.key).unwrap_or(0) + 1;
        ctx.state.insert(self.key.clone(), next);
        Ok(())
    }
}
