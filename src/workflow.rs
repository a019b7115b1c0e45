use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::agent::LlmAgent;
use crate::error::Result;
use crate::runtime::InvocationContext;

pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// A plain Rust step operating directly on the invocation context.
#[async_trait]
pub trait WorkflowTask: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &mut InvocationContext) -> Result<String>;
}

/// Wrap a plain async function as a workflow task.
pub struct FunctionTask<F>
where
    F: for<'a> Fn(&'a mut InvocationContext) -> NodeFuture<'a> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FunctionTask<F>
where
    F: for<'a> Fn(&'a mut InvocationContext) -> NodeFuture<'a> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> WorkflowTask for FunctionTask<F>
where
    F: for<'a> Fn(&'a mut InvocationContext) -> NodeFuture<'a> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<String> {
        (self.func)(ctx).await
    }
}

/// Execution topology: which step runs after which.
#[derive(Clone)]
pub enum WorkflowNode {
    Agent(Arc<LlmAgent>),
    Task(Arc<dyn WorkflowTask>),
    /// Run in order; the reply is the last step's reply. Stops early on escalation.
    Sequence {
        name: String,
        steps: Vec<WorkflowNode>,
    },
    /// Run every branch concurrently on its own copy of the state, then fold
    /// each branch's changed keys back in declaration order.
    Parallel {
        name: String,
        branches: Vec<WorkflowNode>,
    },
    /// Repeat `body` until a step escalates or `max_iterations` is reached.
    Loop {
        name: String,
        body: Box<WorkflowNode>,
        max_iterations: usize,
    },
}

impl WorkflowNode {
    pub fn agent(agent: LlmAgent) -> Self {
        WorkflowNode::Agent(Arc::new(agent))
    }

    pub fn task<T: WorkflowTask + 'static>(task: T) -> Self {
        WorkflowNode::Task(Arc::new(task))
    }

    pub fn sequence(name: impl Into<String>, steps: Vec<WorkflowNode>) -> Self {
        WorkflowNode::Sequence {
            name: name.into(),
            steps,
        }
    }

    pub fn parallel(name: impl Into<String>, branches: Vec<WorkflowNode>) -> Self {
        WorkflowNode::Parallel {
            name: name.into(),
            branches,
        }
    }

    pub fn repeat(name: impl Into<String>, body: WorkflowNode, max_iterations: usize) -> Self {
        WorkflowNode::Loop {
            name: name.into(),
            body: Box::new(body),
            max_iterations,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WorkflowNode::Agent(agent) => agent.name(),
            WorkflowNode::Task(task) => task.name(),
            WorkflowNode::Sequence { name, .. }
            | WorkflowNode::Parallel { name, .. }
            | WorkflowNode::Loop { name, .. } => name,
        }
    }

    pub fn execute<'a>(&'a self, ctx: &'a mut InvocationContext) -> NodeFuture<'a> {
        Box::pin(async move {
            match self {
                WorkflowNode::Agent(agent) => agent.run(ctx).await,
                WorkflowNode::Task(task) => task.run(ctx).await,
                WorkflowNode::Sequence { name, steps } => {
                    let mut last = String::new();
                    for step in steps {
                        last = step.execute(ctx).await?;
                        if ctx.is_escalated() {
                            tracing::debug!(sequence = %name, step = %step.name(), "escalated");
                            break;
                        }
                    }
                    Ok(last)
                }
                WorkflowNode::Parallel { name, branches } => {
                    tracing::debug!(parallel = %name, branches = branches.len(), "fan-out");
                    let base = ctx.state.clone();
                    let runs = branches.iter().map(|branch| {
                        let mut fork = ctx.fork();
                        async move {
                            let reply = branch.execute(&mut fork).await;
                            (fork, reply)
                        }
                    });
                    let finished = join_all(runs).await;

                    let mut replies = Vec::with_capacity(finished.len());
                    for (fork, reply) in finished {
                        replies.push(reply?);
                        ctx.state.merge_changes(&base, &fork.state);
                        if fork.is_escalated() {
                            ctx.set_escalated(true);
                        }
                        ctx.events.extend(fork.events);
                    }
                    Ok(replies.join("\n\n"))
                }
                WorkflowNode::Loop {
                    name,
                    body,
                    max_iterations,
                } => {
                    let mut last = String::new();
                    ctx.set_escalated(false);
                    for iteration in 0..*max_iterations {
                        last = body.execute(ctx).await?;
                        if ctx.is_escalated() {
                            tracing::debug!(loop_name = %name, iteration, "escalated");
                            break;
                        }
                    }
                    ctx.set_escalated(false);
                    Ok(last)
                }
            }
        })
    }
}

/// A named root node.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    pub root: WorkflowNode,
}

impl Workflow {
    pub fn new(name: impl Into<String>, root: WorkflowNode) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    pub async fn run(&self, ctx: &mut InvocationContext) -> Result<String> {
        self.root.execute(ctx).await
    }
}
