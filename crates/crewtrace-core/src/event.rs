use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::TraceContext;
use crate::types::TokenUsage;

/// Lifecycle event kinds published during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessStarted,
    ProcessCompleted,
    ProcessFailed,
    TaskStarted,
    TaskCompleted,
    TaskSkipped,
    TaskFailed,
    SwarmStarted,
    SwarmCompleted,
    SwarmFailed,
    ToolInvoked,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::ProcessStarted,
        EventKind::ProcessCompleted,
        EventKind::ProcessFailed,
        EventKind::TaskStarted,
        EventKind::TaskCompleted,
        EventKind::TaskSkipped,
        EventKind::TaskFailed,
        EventKind::SwarmStarted,
        EventKind::SwarmCompleted,
        EventKind::SwarmFailed,
        EventKind::ToolInvoked,
    ];

    /// Stable wire name, e.g. `task_failed`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProcessStarted => "process_started",
            EventKind::ProcessCompleted => "process_completed",
            EventKind::ProcessFailed => "process_failed",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskSkipped => "task_skipped",
            EventKind::TaskFailed => "task_failed",
            EventKind::SwarmStarted => "swarm_started",
            EventKind::SwarmCompleted => "swarm_completed",
            EventKind::SwarmFailed => "swarm_failed",
            EventKind::ToolInvoked => "tool_invoked",
        }
    }

    pub fn parse(name: &str) -> Option<EventKind> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
///
/// Correlation and span ids are captured from the current [`TraceContext`]
/// when the event is built, so subscribers never need to read thread state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Run identifier (the swarm id) when the event belongs to a run.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ProcessEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        let ctx = TraceContext::current();
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            run_id: None,
            correlation_id: ctx.as_ref().map(|c| c.correlation_id().to_string()),
            span_id: ctx.as_ref().map(|c| c.span_id().to_string()),
            parent_span_id: ctx
                .as_ref()
                .and_then(|c| c.parent_span_id().map(str::to_string)),
            agent_id: None,
            agent_role: None,
            task_id: None,
            tool_name: None,
            status: None,
            error_type: None,
            duration_ms: None,
            usage: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_agent(mut self, id: impl Into<String>, role: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self.agent_role = Some(role.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool_name = Some(tool.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events published after they subscribed.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<ProcessEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ProcessEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("nope"), None);
        assert_eq!(EventKind::TaskFailed.to_string(), "task_failed");
    }

    #[test]
    fn test_event_captures_current_context() {
        let root = TraceContext::create();
        let event = ProcessEvent::new(EventKind::TaskStarted, "started").with_task("t1");
        assert_eq!(event.correlation_id.as_deref(), Some(root.correlation_id()));
        assert_eq!(event.span_id.as_deref(), Some(root.span_id()));
        assert!(event.parent_span_id.is_none());
        TraceContext::restore(None);

        let orphan = ProcessEvent::new(EventKind::TaskStarted, "started");
        assert!(orphan.correlation_id.is_none());
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(ProcessEvent::new(EventKind::ProcessStarted, "go"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ProcessEvent::new(EventKind::TaskStarted, "a"));
        bus.publish(ProcessEvent::new(EventKind::TaskCompleted, "b"));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::TaskStarted);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::TaskCompleted);
    }

    #[test]
    fn test_event_serialization() {
        let event = ProcessEvent::new(EventKind::ToolInvoked, "calculator ran")
            .with_tool("calculator")
            .with_duration(12)
            .with_usage(TokenUsage::new(3, 4));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"tool_invoked\""));
        let parsed: ProcessEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
