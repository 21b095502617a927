//! Test doubles and fixtures shared by the crewtrace crates.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crewtrace_core::context::TraceContext;
use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::event::{EventKind, ProcessEvent};
use crewtrace_core::task::{Task, TaskOutput};
use crewtrace_core::traits::AgentExecutor;
use crewtrace_core::types::{AgentProfile, AgentResponse, TokenUsage};

/// One recorded executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    pub task_id: String,
    pub agent_id: String,
    /// Task ids of the context outputs, in the order given.
    pub context_ids: Vec<String>,
    /// Trace context seen by the executor when it was called.
    pub correlation_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
}

/// Executor with per-task scripted responses and failures.
///
/// Unscripted tasks answer `"Output of <task id>"`. Every call is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: HashMap<String, AgentResponse>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, task_id: &str, raw: &str) -> Self {
        self.respond_with(task_id, AgentResponse::text(raw))
    }

    pub fn respond_with(mut self, task_id: &str, response: AgentResponse) -> Self {
        self.responses.insert(task_id.to_string(), response);
        self
    }

    pub fn fail(mut self, task_id: &str, message: &str) -> Self {
        self.failures.insert(task_id.to_string(), message.to_string());
        self
    }

    pub fn delay(mut self, task_id: &str, delay: Duration) -> Self {
        self.delays.insert(task_id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_task_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.task_id).collect()
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentProfile,
        task: &'a Task,
        context: &'a [TaskOutput],
    ) -> BoxFuture<'a, Result<AgentResponse>> {
        let ctx = TraceContext::current();
        self.calls.lock().unwrap().push(ExecutorCall {
            task_id: task.id.clone(),
            agent_id: agent.id.clone(),
            context_ids: context.iter().map(|o| o.task_id.clone()).collect(),
            correlation_id: ctx.as_ref().map(|c| c.correlation_id().to_string()),
            span_id: ctx.as_ref().map(|c| c.span_id().to_string()),
            parent_span_id: ctx
                .as_ref()
                .and_then(|c| c.parent_span_id().map(str::to_string)),
        });

        Box::pin(async move {
            if let Some(delay) = self.delays.get(&task.id) {
                tokio::time::sleep(*delay).await;
            }
            if let Some(message) = self.failures.get(&task.id) {
                return Err(CrewError::Execution {
                    task_id: task.id.clone(),
                    message: message.clone(),
                });
            }
            Ok(self
                .responses
                .get(&task.id)
                .cloned()
                .unwrap_or_else(|| AgentResponse::text(format!("Output of {}", task.id))))
        })
    }
}

/// Executor that answers with the agent role and task description.
pub struct EchoExecutor;

impl AgentExecutor for EchoExecutor {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentProfile,
        task: &'a Task,
        context: &'a [TaskOutput],
    ) -> BoxFuture<'a, Result<AgentResponse>> {
        Box::pin(async move {
            Ok(AgentResponse::text(format!(
                "[{}] {} (context: {})",
                agent.role,
                task.description,
                context.len()
            )))
        })
    }
}

/// Collect everything currently buffered on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// A small run's worth of events with fixed timestamps, one second apart.
pub fn sample_events(correlation_id: &str) -> Vec<ProcessEvent> {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let at = |secs: i64| base + chrono::Duration::seconds(secs);
    let event = |kind: EventKind, message: &str, secs: i64| {
        let mut e = ProcessEvent::new(kind, message)
            .with_run_id("swarm-1")
            .with_timestamp(at(secs));
        e.correlation_id = Some(correlation_id.to_string());
        e
    };

    vec![
        event(EventKind::SwarmStarted, "Swarm swarm-1 started", 0),
        event(EventKind::ProcessStarted, "sequential process started", 0),
        event(EventKind::TaskStarted, "Task 'research' started", 1)
            .with_task("research")
            .with_agent("researcher", "Senior Researcher"),
        event(EventKind::ToolInvoked, "Tool web_search invoked", 2)
            .with_tool("web_search")
            .with_status("ok")
            .with_duration(250),
        event(EventKind::TaskCompleted, "Task 'research' completed", 3)
            .with_task("research")
            .with_agent("researcher", "Senior Researcher")
            .with_status("completed")
            .with_duration(2000)
            .with_usage(TokenUsage::new(120, 80)),
        event(EventKind::TaskStarted, "Task 'write' started", 4)
            .with_task("write")
            .with_agent("writer", "Technical Writer"),
        event(EventKind::TaskCompleted, "Task 'write' completed", 6)
            .with_task("write")
            .with_agent("writer", "Technical Writer")
            .with_status("completed")
            .with_duration(1500)
            .with_usage(TokenUsage::new(200, 150)),
        event(EventKind::ProcessCompleted, "sequential process completed", 7).with_status("completed"),
        event(EventKind::SwarmCompleted, "Swarm swarm-1 completed", 7).with_status("completed"),
    ]
}

/// Write `contents` to a temporary `.toml` file.
pub fn temp_toml(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Research → analysis → report pipeline used across tests.
pub fn research_pipeline() -> Vec<Task> {
    vec![
        Task::new("research", "Research the current market for electric bikes")
            .with_tools(vec!["web_search".to_string()]),
        Task::new("analysis", "Analyze pricing trends from the research")
            .with_dependencies(["research"]),
        Task::new("report", "Write a short report for leadership")
            .with_dependencies(["research", "analysis"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_executor_records_calls() {
        let executor = ScriptedExecutor::new()
            .respond("a", "scripted")
            .fail("b", "boom");
        let agent = AgentProfile::new("x", "X");

        let a = executor.execute(&agent, &Task::new("a", "A"), &[]).await.unwrap();
        assert_eq!(a.raw, "scripted");
        assert!(executor.execute(&agent, &Task::new("b", "B"), &[]).await.is_err());
        let c = executor.execute(&agent, &Task::new("c", "C"), &[]).await.unwrap();
        assert_eq!(c.raw, "Output of c");

        assert_eq!(executor.called_task_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sample_events_are_chronological() {
        let events = sample_events("run-1");
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().all(|e| e.correlation_id.as_deref() == Some("run-1")));
    }
}
