//! Small prompt-driven agent pipelines on an explicit session-state runtime.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with a Gemini client and a scripted stub.
//! - Tools (`Tool`, `ToolRegistry`) that may read and write the shared `SessionState`.
//! - `LlmAgent`, which renders its instruction from state, loops between the model and
//!   tools, and stores its reply under an output key.
//! - Topologies (`WorkflowNode`): sequence, parallel fan-out, loop, dispatcher delegation.
//! - The bundled pipelines in [`pipelines`].

mod agent;
mod callbacks;
mod config;
mod error;
mod llm;
mod message;
mod runtime;
mod state;
mod telemetry;
mod tool;
mod toolkit;
mod workflow;

pub mod pipelines;
pub mod tools;

pub use agent::{LlmAgent, TRANSFER_TOOL};
pub use callbacks::{
    AgentHook, CallbackContext, CurrentDate, ForbiddenArgumentGuard, ForbiddenPhraseGuard,
    IterationCounter, StateDefaults,
};
pub use config::{AppConfig, LoggingConfig, ModelConfig, ToolsConfig};
pub use error::{PipelineError, Result};
pub use llm::{build_model, GeminiClient, LanguageModel, ModelCompletion, StubModel};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use runtime::{Event, EventKind, InvocationContext, RunOutcome, Runner, Session};
pub use state::SessionState;
pub use telemetry::{env_filter, init_tracing};
pub use tool::{
    parse_args, FunctionTool, Tool, ToolActions, ToolContext, ToolDescription, ToolRegistry,
};
pub use toolkit::{builtin_tool, builtin_toolkit, BUILTIN_TOOLS};
pub use workflow::{FunctionTask, NodeFuture, Workflow, WorkflowNode, WorkflowTask};
