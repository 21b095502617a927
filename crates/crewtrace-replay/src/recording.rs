//! Immutable snapshot of one run's event timeline.
//!
//! The persisted form is camelCase JSON so recordings can be read by tools
//! outside this workspace.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::event::{EventBus, EventKind, ProcessEvent};
use crewtrace_core::types::{new_id, TokenUsage};

/// Overall outcome inferred from event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Completed,
    Failed,
    Unknown,
}

impl RecordingStatus {
    /// Any `*failed*` event wins, then any `*completed*` event.
    pub fn classify<'a>(event_types: impl IntoIterator<Item = &'a str>) -> Self {
        let mut completed = false;
        for name in event_types {
            let name = name.to_lowercase();
            if name.contains("failed") {
                return RecordingStatus::Failed;
            }
            completed |= name.contains("completed");
        }
        if completed {
            RecordingStatus::Completed
        } else {
            RecordingStatus::Unknown
        }
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingStatus::Completed => f.write_str("completed"),
            RecordingStatus::Failed => f.write_str("failed"),
            RecordingStatus::Unknown => f.write_str("unknown"),
        }
    }
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the recording's first event.
    pub elapsed_ms: u64,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub run_id: Option<String>,
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
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl EventRecord {
    fn from_event(event: ProcessEvent, start: DateTime<Utc>) -> Self {
        let elapsed_ms = (event.timestamp - start).num_milliseconds().max(0) as u64;
        Self {
            event_type: event.kind.as_str().to_string(),
            message: event.message,
            timestamp: event.timestamp,
            elapsed_ms,
            duration_ms: event.duration_ms,
            run_id: event.run_id,
            span_id: event.span_id,
            parent_span_id: event.parent_span_id,
            agent_id: event.agent_id,
            agent_role: event.agent_role,
            task_id: event.task_id,
            tool_name: event.tool_name,
            status: event.status,
            error_type: event.error_type,
            input_tokens: event.usage.map(|u| u.input_tokens),
            output_tokens: event.usage.map(|u| u.output_tokens),
            attributes: event.attributes,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.event_type.to_lowercase().contains("failed")
    }

    /// Rebuild the lifecycle event. `None` for event types this build does
    /// not know.
    pub fn to_event(&self, correlation_id: &str) -> Option<ProcessEvent> {
        let kind = EventKind::parse(&self.event_type)?;
        let mut event = ProcessEvent::new(kind, self.message.clone()).with_timestamp(self.timestamp);
        event.correlation_id = Some(correlation_id.to_string());
        event.run_id = self.run_id.clone();
        event.span_id = self.span_id.clone();
        event.parent_span_id = self.parent_span_id.clone();
        event.agent_id = self.agent_id.clone();
        event.agent_role = self.agent_role.clone();
        event.task_id = self.task_id.clone();
        event.tool_name = self.tool_name.clone();
        event.status = self.status.clone();
        event.error_type = self.error_type.clone();
        event.duration_ms = self.duration_ms;
        event.usage = match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0))),
        };
        event.attributes = self.attributes.clone();
        Some(event)
    }
}

/// Aggregates over a recording's timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub total_events: usize,
    pub unique_agents: usize,
    pub unique_tasks: usize,
    pub unique_tools: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Sum of every event's `durationMs`.
    pub total_duration_ms: u64,
    pub error_count: usize,
}

impl RecordingSummary {
    pub fn from_timeline(timeline: &[EventRecord]) -> Self {
        let agents: BTreeSet<&str> = timeline.iter().filter_map(|r| r.agent_id.as_deref()).collect();
        let tasks: BTreeSet<&str> = timeline.iter().filter_map(|r| r.task_id.as_deref()).collect();
        let tools: BTreeSet<&str> = timeline.iter().filter_map(|r| r.tool_name.as_deref()).collect();

        Self {
            total_events: timeline.len(),
            unique_agents: agents.len(),
            unique_tasks: tasks.len(),
            unique_tools: tools.len(),
            total_input_tokens: timeline.iter().filter_map(|r| r.input_tokens).sum(),
            total_output_tokens: timeline.iter().filter_map(|r| r.output_tokens).sum(),
            total_duration_ms: timeline.iter().filter_map(|r| r.duration_ms).sum(),
            error_count: timeline.iter().filter(|r| r.is_failure()).count(),
        }
    }
}

/// Post-hoc record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecording {
    pub correlation_id: String,
    #[serde(default)]
    pub swarm_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RecordingStatus,
    pub timeline: Vec<EventRecord>,
    pub summary: RecordingSummary,
    #[serde(default)]
    pub configuration: BTreeMap<String, serde_json::Value>,
}

impl WorkflowRecording {
    /// Build a recording from raw events. Events are stably sorted by
    /// timestamp, so same-instant events keep their publish order.
    pub fn from_events(mut events: Vec<ProcessEvent>) -> Result<Self> {
        if events.is_empty() {
            return Err(CrewError::EmptyEventStream);
        }
        events.sort_by_key(|e| e.timestamp);

        let start_time = events[0].timestamp;
        let end_time = events[events.len() - 1].timestamp;
        let correlation_id = events
            .iter()
            .find_map(|e| e.correlation_id.clone())
            .unwrap_or_else(|| {
                warn!("Events carry no correlation id, minting one for the recording");
                new_id()
            });
        let swarm_id = events.iter().find_map(|e| e.run_id.clone());

        let timeline: Vec<EventRecord> = events
            .into_iter()
            .map(|e| EventRecord::from_event(e, start_time))
            .collect();
        let status = RecordingStatus::classify(timeline.iter().map(|r| r.event_type.as_str()));
        let summary = RecordingSummary::from_timeline(&timeline);

        Ok(Self {
            correlation_id,
            swarm_id,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            status,
            timeline,
            summary,
            configuration: BTreeMap::new(),
        })
    }

    pub fn with_configuration(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path, pretty: bool) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = if pretty { self.to_json_pretty()? } else { self.to_json()? };
        std::fs::write(path, json)?;
        debug!(path = %path.display(), events = self.timeline.len(), "Recording saved");
        Ok(())
    }

    /// Save as `{dir}/{correlation_id}.json` and return the path.
    pub fn save_in(&self, dir: &Path, pretty: bool) -> Result<PathBuf> {
        let path = dir.join(format!("{}.json", self.correlation_id));
        self.save(&path, pretty)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Lifecycle events in timeline order.
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.timeline
            .iter()
            .filter_map(|r| {
                let event = r.to_event(&self.correlation_id);
                if event.is_none() {
                    warn!(event_type = %r.event_type, "Skipping unknown event type");
                }
                event
            })
            .collect()
    }

    /// Republish the timeline onto `bus`. Returns how many events were sent.
    pub fn replay_into(&self, bus: &EventBus) -> usize {
        let events = self.events();
        let count = events.len();
        for event in events {
            bus.publish(event);
        }
        debug!(correlation_id = %self.correlation_id, count, "Recording replayed");
        count
    }

    pub fn failures(&self) -> Vec<&EventRecord> {
        self.timeline.iter().filter(|r| r.is_failure()).collect()
    }

    pub fn timeline_for_task(&self, task_id: &str) -> Vec<&EventRecord> {
        self.timeline
            .iter()
            .filter(|r| r.task_id.as_deref() == Some(task_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewtrace_test_utils::{drain, sample_events};

    #[test]
    fn test_empty_stream_is_rejected() {
        assert!(matches!(
            WorkflowRecording::from_events(vec![]),
            Err(CrewError::EmptyEventStream)
        ));
    }

    #[test]
    fn test_from_events() {
        let recording = WorkflowRecording::from_events(sample_events("run-1")).unwrap();

        assert_eq!(recording.correlation_id, "run-1");
        assert_eq!(recording.swarm_id.as_deref(), Some("swarm-1"));
        assert_eq!(recording.status, RecordingStatus::Completed);
        assert_eq!(recording.duration_ms, 7000);
        assert_eq!(recording.timeline[4].elapsed_ms, 3000);

        let summary = &recording.summary;
        assert_eq!(summary.total_events, 9);
        assert_eq!(summary.unique_agents, 2);
        assert_eq!(summary.unique_tasks, 2);
        assert_eq!(summary.unique_tools, 1);
        assert_eq!(summary.total_input_tokens, 320);
        assert_eq!(summary.total_output_tokens, 230);
        assert_eq!(summary.total_duration_ms, 3750);
        assert_eq!(summary.error_count, 0);
    }

    #[test]
    fn test_events_are_sorted_stably() {
        let mut events = sample_events("run-1");
        events.reverse();
        let recording = WorkflowRecording::from_events(events).unwrap();

        let types: Vec<&str> = recording.timeline.iter().map(|r| r.event_type.as_str()).collect();
        assert_eq!(types.first(), Some(&"process_started"));
        assert_eq!(types.last(), Some(&"process_completed"));
        assert!(recording
            .timeline
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_status_classifier() {
        assert_eq!(
            RecordingStatus::classify(["task_completed", "task_failed"]),
            RecordingStatus::Failed
        );
        assert_eq!(
            RecordingStatus::classify(["task_started", "swarm_completed"]),
            RecordingStatus::Completed
        );
        assert_eq!(RecordingStatus::classify(["task_started"]), RecordingStatus::Unknown);
        assert_eq!(RecordingStatus::classify(["TASK_FAILED"]), RecordingStatus::Failed);
    }

    #[test]
    fn test_failure_is_counted() {
        let mut events = sample_events("run-1");
        let last = events.last().unwrap().timestamp;
        events.push(
            ProcessEvent::new(EventKind::TaskFailed, "Task 'review' failed")
                .with_task("review")
                .with_error_type("execution_error")
                .with_timestamp(last),
        );
        let recording = WorkflowRecording::from_events(events).unwrap();
        assert_eq!(recording.status, RecordingStatus::Failed);
        assert_eq!(recording.summary.error_count, 1);
        assert_eq!(recording.failures()[0].task_id.as_deref(), Some("review"));
    }

    #[test]
    fn test_json_round_trip() {
        let recording = WorkflowRecording::from_events(sample_events("run-1"))
            .unwrap()
            .with_configuration("process", serde_json::json!("sequential"));

        let json = recording.to_json().unwrap();
        assert!(json.contains("\"correlationId\":\"run-1\""));
        assert!(json.contains("\"eventType\":\"task_completed\""));
        assert!(json.contains("\"inputTokens\":120"));

        let parsed = WorkflowRecording::from_json(&json).unwrap();
        assert_eq!(parsed, recording);
        assert_eq!(parsed.timeline.len(), recording.timeline.len());
        assert_eq!(parsed.summary, recording.summary);
    }

    #[test]
    fn test_absent_fields_are_written_as_null() {
        let recording = WorkflowRecording::from_events(sample_events("run-1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&recording.to_json().unwrap()).unwrap();

        let started = &value["timeline"][0];
        assert_eq!(started["eventType"], "swarm_started");
        for key in ["durationMs", "agentId", "agentRole", "taskId", "toolName", "status", "errorType", "inputTokens"] {
            assert!(started.get(key).is_some_and(|v| v.is_null()), "missing {key}");
        }

        let legacy = r#"{"eventType":"task_started","message":"m","timestamp":"2024-05-01T12:00:00Z","elapsedMs":0}"#;
        let record: EventRecord = serde_json::from_str(legacy).unwrap();
        assert!(record.duration_ms.is_none());
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let recording = WorkflowRecording::from_events(sample_events("run-1")).unwrap();

        let path = recording.save_in(&dir.path().join("nested"), true).unwrap();
        assert!(path.ends_with("run-1.json"));
        assert_eq!(WorkflowRecording::load(&path).unwrap(), recording);
    }

    #[test]
    fn test_task_timeline() {
        let recording = WorkflowRecording::from_events(sample_events("run-1")).unwrap();
        let research: Vec<&str> = recording
            .timeline_for_task("research")
            .iter()
            .map(|r| r.event_type.as_str())
            .collect();
        assert_eq!(research, vec!["task_started", "task_completed"]);
        assert!(recording.timeline_for_task("nope").is_empty());
    }

    #[tokio::test]
    async fn test_replay_republishes_in_order() {
        let original = sample_events("run-1");
        let recording = WorkflowRecording::from_events(original.clone()).unwrap();

        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        assert_eq!(recording.replay_into(&bus), original.len());

        let replayed = drain(&mut rx);
        let kinds: Vec<EventKind> = replayed.iter().map(|e| e.kind).collect();
        let expected: Vec<EventKind> = original.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, expected);
        assert_eq!(replayed[4].usage, Some(TokenUsage::new(120, 80)));
        assert_eq!(replayed[4].timestamp, original[4].timestamp);

        let rebuilt = WorkflowRecording::from_events(replayed).unwrap();
        assert_eq!(rebuilt.timeline, recording.timeline);
    }
}
