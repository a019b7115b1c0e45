//! Invocation context, event log and the runner that drives a pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::message::Message;
use crate::state::SessionState;
use crate::workflow::WorkflowNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Reply,
    ToolCall,
    ToolResult,
    Transfer,
    Escalate,
    /// Content is the comma-separated list of keys that were written.
    StateUpdate,
}

/// Something an agent did during a run, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub author: String,
    pub kind: EventKind,
    pub content: String,
}

impl Event {
    pub fn new(author: impl Into<String>, kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            kind,
            content: content.into(),
        }
    }
}

/// State threaded explicitly through every step of one run.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub user_input: String,
    pub history: Vec<Message>,
    pub state: SessionState,
    pub events: Vec<Event>,
    escalated: bool,
}

impl InvocationContext {
    pub fn new(user_input: impl Into<String>, state: SessionState) -> Self {
        Self {
            user_input: user_input.into(),
            history: Vec::new(),
            state,
            events: Vec::new(),
            escalated: false,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn record(&mut self, author: &str, kind: EventKind, content: impl Into<String>) {
        self.events.push(Event::new(author, kind, content));
    }

    pub fn escalate(&mut self, author: &str) {
        self.escalated = true;
        self.record(author, EventKind::Escalate, "escalate");
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    pub(crate) fn set_escalated(&mut self, escalated: bool) {
        self.escalated = escalated;
    }

    /// A copy used by one parallel branch: same input, history and state, empty log.
    pub(crate) fn fork(&self) -> Self {
        Self {
            user_input: self.user_input.clone(),
            history: self.history.clone(),
            state: self.state.clone(),
            events: Vec::new(),
            escalated: false,
        }
    }
}

/// What a finished run hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub reply: String,
    pub state: SessionState,
    pub events: Vec<Event>,
}

impl RunOutcome {
    /// Final reply text of the named agent, if it replied during the run.
    pub fn reply_of(&self, author: &str) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.author == author && e.kind == EventKind::Reply)
            .map(|e| e.content.as_str())
    }
}

/// Runs a root node against a fresh session state per call.
pub struct Runner {
    app_name: String,
    root: WorkflowNode,
    initial_state: Map<String, Value>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("app_name", &self.app_name)
            .field("root", &self.root.name())
            .field("initial_state", &self.initial_state.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Runner {
    pub fn new(app_name: impl Into<String>, root: WorkflowNode) -> Self {
        Self {
            app_name: app_name.into(),
            root,
            initial_state: Map::new(),
        }
    }

    pub fn with_initial_state(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.initial_state.insert(key.into(), value.into());
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn root(&self) -> &WorkflowNode {
        &self.root
    }

    /// Execute one run. State starts from the initial state and is returned
    /// in the outcome; nothing is kept afterwards.
    pub async fn run(&self, user_input: impl Into<String>) -> Result<RunOutcome> {
        let state = SessionState::from_map(self.initial_state.clone());
        let mut ctx = InvocationContext::new(user_input, state);
        self.execute(&mut ctx).await
    }

    /// Open a multi-turn session that keeps state and history between turns.
    pub fn session(&self) -> Session<'_> {
        Session {
            runner: self,
            state: SessionState::from_map(self.initial_state.clone()),
            history: Vec::new(),
        }
    }

    async fn execute(&self, ctx: &mut InvocationContext) -> Result<RunOutcome> {
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(app = %self.app_name, %run_id, root = %self.root.name(), "run started");
        let reply = match self.root.execute(ctx).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(app = %self.app_name, %run_id, error = %err, "run failed");
                return Err(err);
            }
        };
        tracing::info!(
            app = %self.app_name,
            %run_id,
            events = ctx.events.len(),
            state_keys = ctx.state.len(),
            "run finished"
        );
        Ok(RunOutcome {
            reply,
            state: ctx.state.clone(),
            events: ctx.events.clone(),
        })
    }
}

/// A conversation with a runner spanning several user turns.
pub struct Session<'r> {
    runner: &'r Runner,
    state: SessionState,
    history: Vec<Message>,
}

impl<'r> Session<'r> {
    pub async fn send(&mut self, user_input: impl Into<String>) -> Result<RunOutcome> {
        let user_input = user_input.into();
        let mut ctx = InvocationContext::new(user_input.clone(), self.state.clone())
            .with_history(self.history.clone());
        let outcome = self.runner.execute(&mut ctx).await?;
        self.state = outcome.state.clone();
        self.history.push(Message::user(user_input));
        self.history.push(Message::assistant(outcome.reply.clone()));
        Ok(outcome)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }
}
