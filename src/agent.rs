use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::callbacks::{AgentHook, CallbackContext};
use crate::error::{PipelineError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;
use crate::runtime::{EventKind, InvocationContext};
use crate::tool::{ToolContext, ToolDescription, ToolRegistry};

/// Name of the built-in tool a dispatcher uses to hand over to a sub-agent.
pub const TRANSFER_TOOL: &str = "transfer_to_agent";

type AgentFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

#[derive(Debug, Deserialize)]
struct TransferArgs {
    agent_name: String,
}

/// A named prompt plus tools, sub-agents and hooks, driven by a language model.
pub struct LlmAgent {
    name: String,
    description: String,
    instruction: String,
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    output_key: Option<String>,
    input_schema: Option<Value>,
    sub_agents: Vec<Arc<LlmAgent>>,
    hooks: Vec<Arc<dyn AgentHook>>,
    max_steps: usize,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: "You are a helpful agent.".to_string(),
            model,
            tools: ToolRegistry::new(),
            output_key: None,
            input_schema: None,
            sub_agents: Vec::new(),
            hooks: Vec::new(),
            max_steps: 8,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Instruction template; `{key}` placeholders are filled from session state.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Store the final reply in session state under `key`.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Require the user input to be a JSON object matching `schema`'s `required` fields.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_sub_agent(mut self, agent: LlmAgent) -> Self {
        self.sub_agents.push(Arc::new(agent));
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sub_agents(&self) -> &[Arc<LlmAgent>] {
        &self.sub_agents
    }

    /// Run this agent for the context's user input and return its final reply.
    pub fn run<'a>(&'a self, ctx: &'a mut InvocationContext) -> AgentFuture<'a> {
        Box::pin(async move {
            tracing::debug!(agent = %self.name, "agent started");
            {
                let mut cb = CallbackContext::new(&self.name, &mut ctx.state);
                for hook in &self.hooks {
                    hook.before_agent(&mut cb).await?;
                }
            }

            let instruction = ctx.state.render(&self.instruction, &self.name)?;
            self.validate_input(&ctx.user_input)?;

            let tools = self.tool_descriptions();
            let system = self.build_system_message(&instruction, &tools);
            let mut transcript = ctx.history.clone();
            transcript.push(Message::user(ctx.user_input.clone()));

            for _ in 0..self.max_steps {
                let mut request = vec![Message::system(system.clone())];
                request.extend(transcript.iter().cloned());
                {
                    let cb = CallbackContext::new(&self.name, &mut ctx.state);
                    for hook in &self.hooks {
                        hook.before_model(&cb, &request).await?;
                    }
                }

                let completion = self.model.complete_chat(&request, &tools, false).await?;
                {
                    let cb = CallbackContext::new(&self.name, &mut ctx.state);
                    for hook in &self.hooks {
                        hook.after_model(&cb, &completion).await?;
                    }
                }

                if !completion.tool_calls.is_empty() {
                    for mut call in completion.tool_calls {
                        if call.id.is_none() {
                            call.id = Some(format!("call-{}", transcript.len()));
                        }
                        {
                            let cb = CallbackContext::new(&self.name, &mut ctx.state);
                            for hook in &self.hooks {
                                hook.before_tool(&cb, &call).await?;
                            }
                        }
                        ctx.record(
                            &self.name,
                            EventKind::ToolCall,
                            format!("{}({})", call.name, call.arguments),
                        );
                        transcript.push(Message::tool_call(call.clone()));

                        if call.name == TRANSFER_TOOL && !self.sub_agents.is_empty() {
                            let args: TransferArgs =
                                crate::tool::parse_args(TRANSFER_TOOL, call.arguments.clone())?;
                            return self.transfer(&args.agent_name, ctx).await;
                        }

                        let before = ctx.state.clone();
                        let (output, actions) = {
                            let mut tool_ctx = ToolContext::new(&mut ctx.state, &self.name);
                            let output = self
                                .tools
                                .call(&call.name, call.arguments.clone(), &mut tool_ctx)
                                .await?;
                            (output, tool_ctx.actions)
                        };
                        tracing::debug!(agent = %self.name, tool = %call.name, "tool returned");

                        let result = Message::tool_with_call(&call.name, output, call.id.clone());
                        {
                            let cb = CallbackContext::new(&self.name, &mut ctx.state);
                            if let Some(tool_result) = &result.tool_result {
                                for hook in &self.hooks {
                                    hook.after_tool(&cb, tool_result).await?;
                                }
                            }
                        }
                        ctx.record(&self.name, EventKind::ToolResult, result.content.clone());
                        transcript.push(result);
                        let changed = ctx.state.changed_keys(&before);
                        if !changed.is_empty() {
                            ctx.record(&self.name, EventKind::StateUpdate, changed.join(", "));
                        }

                        if actions.escalate {
                            ctx.escalate(&self.name);
                        }
                        if let Some(target) = actions.transfer_to {
                            return self.transfer(&target, ctx).await;
                        }
                    }
                    continue;
                }

                return match completion.content {
                    Some(content) => self.finish(content, ctx).await,
                    None => Err(PipelineError::Protocol(
                        "Model response missing content and tool calls".into(),
                    )),
                };
            }

            Err(PipelineError::Protocol(format!(
                "Agent `{}` reached the step limit without returning a response",
                self.name
            )))
        })
    }

    async fn finish(&self, content: String, ctx: &mut InvocationContext) -> Result<String> {
        if let Some(key) = &self.output_key {
            ctx.state.insert(key.clone(), content.clone());
            ctx.record(&self.name, EventKind::StateUpdate, key.clone());
        }
        ctx.record(&self.name, EventKind::Reply, content.clone());
        let mut cb = CallbackContext::new(&self.name, &mut ctx.state);
        for hook in &self.hooks {
            hook.after_agent(&mut cb, &content).await?;
        }
        tracing::debug!(agent = %self.name, output_key = ?self.output_key, "agent finished");
        Ok(content)
    }

    async fn transfer(&self, target: &str, ctx: &mut InvocationContext) -> Result<String> {
        let agent = self
            .sub_agents
            .iter()
            .find(|agent| agent.name == target)
            .ok_or_else(|| PipelineError::AgentNotFound(target.to_string()))?;
        tracing::info!(from = %self.name, to = %target, "transferring");
        ctx.record(&self.name, EventKind::Transfer, target);
        agent.run(ctx).await
    }

    fn validate_input(&self, input: &str) -> Result<()> {
        let Some(schema) = &self.input_schema else {
            return Ok(());
        };
        let parsed: Value = serde_json::from_str(input).map_err(|err| {
            PipelineError::Protocol(format!(
                "`{}` expects JSON input matching {schema}: {err}",
                self.name
            ))
        })?;
        let object = parsed.as_object().ok_or_else(|| {
            PipelineError::Protocol(format!("`{}` expects a JSON object", self.name))
        })?;
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                return Err(PipelineError::Protocol(format!(
                    "`{}` input is missing required field `{field}`",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn tool_descriptions(&self) -> Vec<ToolDescription> {
        let mut tools = self.tools.describe();
        if !self.sub_agents.is_empty() {
            tools.push(ToolDescription {
                name: TRANSFER_TOOL.to_string(),
                description: "Hand the conversation to one of the listed sub-agents.".to_string(),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {"agent_name": {"type": "string"}},
                    "required": ["agent_name"]
                })),
            });
        }
        tools
    }

    fn build_system_message(&self, instruction: &str, tools: &[ToolDescription]) -> String {
        let mut prompt = String::new();
        prompt.push_str(instruction);
        if !self.description.is_empty() {
            prompt.push_str(&format!("\n\nYou are `{}`: {}", self.name, self.description));
        }
        if let Some(schema) = &self.input_schema {
            prompt.push_str(&format!(
                "\n\nUser input is expected to follow this JSON shape: {schema}"
            ));
        }
        prompt.push_str(
            "\n\nWhen a tool is relevant, call it with JSON arguments. Otherwise, reply directly.",
        );
        if tools.is_empty() {
            prompt.push_str(" No tools are available.\n");
        } else {
            prompt.push_str("\nAvailable tools:\n");
            for tool in tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
                if let Some(params) = &tool.parameters {
                    prompt.push_str(&format!("  parameters: {}\n", params));
                }
            }
        }
        if !self.sub_agents.is_empty() {
            prompt.push_str("\nSub-agents you can transfer to:\n");
            for agent in &self.sub_agents {
                prompt.push_str(&format!("- {}: {}\n", agent.name, agent.description));
            }
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::callbacks::{ForbiddenArgumentGuard, ForbiddenPhraseGuard, StateDefaults};
    use crate::state::SessionState;
    use crate::tool::{FunctionTool, Tool};
    use crate::StubModel;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the `text` field back"
        }

        fn parameters(&self) -> Option<Value> {
            Some(json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
            }))
        }

        async fn call(&self, input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
            Ok(input)
        }
    }

    fn ctx(input: &str) -> InvocationContext {
        InvocationContext::new(input, SessionState::new())
    }

    #[tokio::test]
    async fn reply_is_stored_under_output_key() {
        let model = StubModel::new(vec![r#"{"action":"respond","content":"Hello!"}"#.into()]);
        let agent = LlmAgent::new("greeter", model).with_output_key("greeting");
        let mut ctx = ctx("hi");

        let reply = agent.run(&mut ctx).await.unwrap();

        assert_eq!(reply, "Hello!");
        assert_eq!(ctx.state.get_str("greeting"), Some("Hello!"));
        let kinds: Vec<EventKind> = ctx.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::StateUpdate, EventKind::Reply]);
        assert_eq!(ctx.events[0].content, "greeting");
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"ping"}}"#.into(),
            r#"{"action":"respond","content":"Echoed your request."}"#.into(),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        let agent = LlmAgent::new("echoer", model.clone()).with_tools(tools);
        let mut ctx = ctx("say ping");

        let reply = agent.run(&mut ctx).await.unwrap();

        assert_eq!(reply, "Echoed your request.");
        let kinds: Vec<EventKind> = ctx.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::ToolCall, EventKind::ToolResult, EventKind::Reply]
        );
        // second request carries the tool traffic
        assert_eq!(model.requests()[1].len(), 4);
    }

    #[tokio::test]
    async fn state_writes_by_tools_are_recorded() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"remember","arguments":{"colour":"green"}}"#.into(),
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"ping"}}"#.into(),
            "Noted.".into(),
        ]);
        let tools = ToolRegistry::new().with(EchoTool).with(FunctionTool::new(
            "remember",
            "Stores the favourite colour",
            |input, ctx| {
                ctx.state.insert("favourite_colour", input["colour"].clone());
                ctx.state.remove("stale");
                Ok(json!("saved"))
            },
        ));
        let agent = LlmAgent::new("memo", model).with_tools(tools);
        let mut ctx = ctx("my favourite colour is green");
        ctx.state.insert("stale", true);

        agent.run(&mut ctx).await.unwrap();

        let updates: Vec<&str> = ctx
            .events
            .iter()
            .filter(|e| e.kind == EventKind::StateUpdate)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(updates, vec!["favourite_colour, stale"]);
        assert_eq!(ctx.state.get_str("favourite_colour"), Some("green"));
    }

    #[tokio::test]
    async fn instruction_is_rendered_from_state() {
        let model = StubModel::new(vec!["done".into()]);
        let agent = LlmAgent::new("refactorer", model.clone())
            .with_instruction("Code:\n{generated_code}\nReview:\n{review_comments}");
        let mut ctx = ctx("go");
        ctx.state.insert("generated_code", "print(1)");
        ctx.state.insert("review_comments", "No major issues found.");

        agent.run(&mut ctx).await.unwrap();

        let system = &model.requests()[0][0].content;
        assert!(system.starts_with("Code:\nprint(1)\nReview:\nNo major issues found."));
        assert!(system.contains("No tools are available"));
    }

    #[tokio::test]
    async fn missing_template_key_fails_before_calling_the_model() {
        let model = StubModel::new(vec!["unused".into()]);
        let agent = LlmAgent::new("refactorer", model.clone()).with_instruction("{generated_code}");
        let mut ctx = ctx("go");

        let err = agent.run(&mut ctx).await.unwrap_err();

        assert!(matches!(err, PipelineError::MissingStateKey { .. }));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn before_agent_hook_seeds_template_keys() {
        let model = StubModel::new(vec!["ok".into()]);
        let agent = LlmAgent::new("critic", model)
            .with_instruction("Draft: {current_draft}")
            .with_hook(Arc::new(StateDefaults::new().with("current_draft", "No draft yet.")));
        let mut ctx = ctx("critique");

        agent.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.state.get_str("current_draft"), Some("No draft yet."));
    }

    #[tokio::test]
    async fn phrase_guard_aborts_before_the_model() {
        let model = StubModel::new(vec!["unused".into()]);
        let agent = LlmAgent::new("root", model.clone())
            .with_hook(Arc::new(ForbiddenPhraseGuard::new("bad word", "nope")));
        let mut ctx = ctx("say a bad word");

        let err = agent.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Rejected { .. }));
        assert_eq!(model.remaining(), 1);
    }

    #[tokio::test]
    async fn tool_guard_blocks_the_call() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"city":"Tokyo"}}"#.into(),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        let agent = LlmAgent::new("weather", model)
            .with_tools(tools)
            .with_hook(Arc::new(ForbiddenArgumentGuard::new("city", "tokyo", "no Tokyo")));
        let mut ctx = ctx("weather in Tokyo");

        let err = agent.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Rejected { .. }));
        assert!(ctx.events.is_empty());
    }

    #[tokio::test]
    async fn transfers_to_named_sub_agent() {
        let root_model = StubModel::new(vec![
            json!({
                "action": "call_tool",
                "name": TRANSFER_TOOL,
                "arguments": {"agent_name": "greeter"}
            })
            .to_string(),
        ]);
        let greeter_model = StubModel::new(vec!["Hi there!".into()]);
        let root = LlmAgent::new("root", root_model.clone()).with_sub_agent(
            LlmAgent::new("greeter", greeter_model)
                .with_description("Says hello")
                .with_output_key("greeting"),
        );
        let mut ctx = ctx("hello");

        let reply = root.run(&mut ctx).await.unwrap();

        assert_eq!(reply, "Hi there!");
        assert_eq!(ctx.state.get_str("greeting"), Some("Hi there!"));
        assert!(ctx
            .events
            .iter()
            .any(|e| e.kind == EventKind::Transfer && e.content == "greeter"));
        let system = &root_model.requests()[0][0].content;
        assert!(system.contains("- greeter: Says hello"));
        assert!(system.contains(TRANSFER_TOOL));
    }

    #[tokio::test]
    async fn unknown_transfer_target_is_an_error() {
        let model = StubModel::new(vec![
            json!({
                "action": "call_tool",
                "name": TRANSFER_TOOL,
                "arguments": {"agent_name": "ghost"}
            })
            .to_string(),
        ]);
        let root = LlmAgent::new("root", model)
            .with_sub_agent(LlmAgent::new("greeter", StubModel::new(vec![])));
        let mut ctx = ctx("hello");

        let err = root.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::AgentNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn escalating_tool_marks_the_context() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"stop","arguments":{}}"#.into(),
            "stopped".into(),
        ]);
        let tools = ToolRegistry::new().with(FunctionTool::new("stop", "Stops", |_, ctx| {
            ctx.actions.escalate = true;
            Ok(json!("ok"))
        }));
        let agent = LlmAgent::new("writer", model).with_tools(tools);
        let mut ctx = ctx("write");

        agent.run(&mut ctx).await.unwrap();
        assert!(ctx.is_escalated());
    }

    #[tokio::test]
    async fn input_schema_requires_fields() {
        let schema = json!({"type": "object", "required": ["country"]});
        let agent = LlmAgent::new("capital", StubModel::new(vec!["Paris".into()]))
            .with_input_schema(schema.clone());

        let mut bad = ctx("France");
        assert!(matches!(
            agent.run(&mut bad).await,
            Err(PipelineError::Protocol(_))
        ));

        let mut missing = ctx(r#"{"nation": "France"}"#);
        assert!(agent.run(&mut missing).await.is_err());

        let agent = LlmAgent::new("capital", StubModel::new(vec!["Paris".into()]))
            .with_input_schema(schema);
        let mut good = ctx(r#"{"country": "France"}"#);
        assert_eq!(agent.run(&mut good).await.unwrap(), "Paris");
    }

    #[tokio::test]
    async fn step_limit_is_enforced() {
        let call = r#"{"action":"call_tool","name":"echo","arguments":{}}"#.to_string();
        let model = StubModel::new(vec![call.clone(), call]);
        let agent = LlmAgent::new("looper", model)
            .with_tools(ToolRegistry::new().with(EchoTool))
            .with_max_steps(2);
        let mut ctx = ctx("go");

        let err = agent.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("step limit"));
    }
}
