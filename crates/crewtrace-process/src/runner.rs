use std::time::Instant;

use tracing::{debug, error, info, warn};

use crewtrace_core::context::TraceContext;
use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::event::{EventBus, EventKind, ProcessEvent};
use crewtrace_core::task::{context_text, Task, TaskOutput};
use crewtrace_core::types::new_id;
use crewtrace_trace::{DecisionNode, DecisionTracer};

use crate::agent::Agent;

/// How a task's executor call is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Awaited on the calling task.
    Inline,
    /// Spawned on a runtime worker with an explicit child context, then
    /// awaited before the run continues.
    Background,
}

/// Shared per-run plumbing used by both strategies to execute one task.
pub struct TaskRunner<'a> {
    bus: &'a EventBus,
    tracer: &'a DecisionTracer,
    run_id: &'a str,
}

impl<'a> TaskRunner<'a> {
    pub fn new(bus: &'a EventBus, tracer: &'a DecisionTracer, run_id: &'a str) -> Self {
        Self { bus, tracer, run_id }
    }

    pub fn run_id(&self) -> &str {
        self.run_id
    }

    pub fn tracer(&self) -> &DecisionTracer {
        self.tracer
    }

    /// Build an event stamped with this run's id and the current span.
    pub fn event(&self, kind: EventKind, message: impl Into<String>) -> ProcessEvent {
        ProcessEvent::new(kind, message).with_run_id(self.run_id)
    }

    pub fn publish(&self, event: ProcessEvent) {
        self.bus.publish(event);
    }

    /// Execute `task` with `agent` inside a fresh child span.
    ///
    /// `prior` holds every output produced so far, in execution order. It is
    /// narrowed to the task's declared dependencies when it has any. A false
    /// gating condition skips the task without calling the executor.
    pub async fn run_task(
        &self,
        task: &mut Task,
        agent: &Agent,
        prior: &[TaskOutput],
        dispatch: Dispatch,
    ) -> Result<TaskOutput> {
        let span = match TraceContext::current() {
            Some(parent) => parent.child(),
            None => TraceContext::detached_root(new_id()),
        };
        span.scope(self.run_in_span(task, agent, prior, dispatch)).await
    }

    async fn run_in_span(
        &self,
        task: &mut Task,
        agent: &Agent,
        prior: &[TaskOutput],
        dispatch: Dispatch,
    ) -> Result<TaskOutput> {
        task.start()?;
        TraceContext::set_attribute("task_id", task.id.clone());
        TraceContext::set_attribute("agent_id", agent.id());

        info!(task_id = %task.id, agent = %agent.role(), "Task started");
        self.publish(
            self.event(EventKind::TaskStarted, format!("Task '{}' started", task.id))
                .with_task(&task.id)
                .with_agent(agent.id(), agent.role()),
        );

        let context: Vec<TaskOutput> = if task.dependencies.is_empty() {
            prior.to_vec()
        } else {
            prior
                .iter()
                .filter(|o| task.dependencies.contains(&o.task_id))
                .cloned()
                .collect()
        };

        if let Some(ref condition) = task.condition {
            let refs: Vec<&TaskOutput> = context.iter().collect();
            if !condition.evaluate(&context_text(&refs)) {
                task.skip()?;
                info!(task_id = %task.id, "Condition not met, task skipped");
                self.publish(
                    self.event(EventKind::TaskSkipped, format!("Task '{}' skipped: condition not met", task.id))
                        .with_task(&task.id)
                        .with_agent(agent.id(), agent.role())
                        .with_status("skipped"),
                );
                return Ok(TaskOutput::skipped(task, agent.profile()));
            }
        }

        let start = Instant::now();
        let result = match dispatch {
            Dispatch::Inline => agent.execute(task, &context).await,
            Dispatch::Background => self.execute_in_background(task, agent, &context).await,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        TraceContext::record_timing("execution", elapsed_ms);

        match result {
            Ok(response) => {
                task.complete()?;
                let output = TaskOutput::from_response(task, agent.profile(), response, elapsed_ms);
                info!(task_id = %task.id, elapsed_ms, "Task completed");
                self.publish(
                    self.event(EventKind::TaskCompleted, format!("Task '{}' completed", task.id))
                        .with_task(&task.id)
                        .with_agent(agent.id(), agent.role())
                        .with_status("completed")
                        .with_duration(elapsed_ms)
                        .with_usage(output.usage)
                        .with_attribute("tools_used", output.tools_used.join(",")),
                );
                self.record_decision(task, agent, &context, &output);
                Ok(output)
            }
            Err(e) => {
                let reason = e.to_string();
                task.fail(reason.clone())?;
                error!(task_id = %task.id, error = %reason, "Task failed");
                self.publish(
                    self.event(EventKind::TaskFailed, format!("Task '{}' failed: {}", task.id, reason))
                        .with_task(&task.id)
                        .with_agent(agent.id(), agent.role())
                        .with_status("failed")
                        .with_error_type(error_type(&e))
                        .with_duration(elapsed_ms),
                );
                Err(e)
            }
        }
    }

    async fn execute_in_background(
        &self,
        task: &Task,
        agent: &Agent,
        context: &[TaskOutput],
    ) -> Result<crewtrace_core::types::AgentResponse> {
        let worker_ctx = match TraceContext::current() {
            Some(ctx) => ctx.child(),
            None => TraceContext::detached_root(new_id()),
        };
        debug!(task_id = %task.id, span_id = %worker_ctx.span_id(), "Dispatching task to background worker");

        let executor = agent.executor();
        let profile = agent.profile().clone();
        let owned_task = task.clone();
        let owned_context = context.to_vec();
        let handle = tokio::spawn(worker_ctx.scope(async move {
            executor.execute(&profile, &owned_task, &owned_context).await
        }));

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(CrewError::Join {
                task_id: task.id.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn record_decision(&self, task: &Task, agent: &Agent, context: &[TaskOutput], output: &TaskOutput) {
        if !self.tracer.is_enabled() {
            return;
        }
        let built = DecisionNode::from_output(agent.profile(), task, output)
            .prompt(render_prompt(task, context))
            .context_tasks(context.iter().map(|o| o.task_id.clone()))
            .build();
        match built {
            Ok(node) => {
                self.tracer.record_decision(node);
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Could not record decision"),
        }
    }
}

/// The prompt artifact stored with a decision: the task plus the context
/// text it was given.
pub fn render_prompt(task: &Task, context: &[TaskOutput]) -> String {
    let mut prompt = task.description.clone();
    if let Some(ref expected) = task.expected_output {
        prompt.push_str("\n\nExpected output: ");
        prompt.push_str(expected);
    }
    if !context.is_empty() {
        prompt.push_str("\n\nContext:");
        for output in context {
            prompt.push_str(&format!("\n[{}] {}", output.task_id, output.raw));
        }
    }
    prompt
}

/// Short classification stored on failure events.
pub fn error_type(err: &CrewError) -> &'static str {
    match err.root_cause() {
        CrewError::Execution { .. } => "execution_error",
        CrewError::ToolExecution { .. } | CrewError::ToolNotFound(_) => "tool_error",
        CrewError::AlreadyExecuted { .. } | CrewError::InvalidTransition { .. } => "state_error",
        CrewError::Join { .. } => "join_error",
        e if e.is_configuration() => "configuration_error",
        _ => "internal_error",
    }
}
