//! End-to-end runs: swarm execution, decision tracing, recording and replay
//! wired together the way the CLI wires them.

use std::sync::Arc;

use crewtrace_core::event::{EventBus, EventKind};
use crewtrace_core::task::TaskStatus;
use crewtrace_core::types::{AgentProfile, AgentResponse, TokenUsage};
use crewtrace_core::CrewError;
use crewtrace_process::{Agent, Swarm};
use crewtrace_replay::{Recorder, RecordingStatus, WorkflowRecording};
use crewtrace_test_utils::{drain, research_pipeline, ScriptedExecutor};
use crewtrace_trace::DecisionTracer;

fn analyst(executor: &Arc<ScriptedExecutor>) -> Agent {
    Agent::new(
        AgentProfile::new("analyst", "Market Analyst")
            .with_goal("Explain where the market is heading")
            .with_tools(vec!["web_search".into()]),
        executor.clone(),
    )
}

#[tokio::test]
async fn test_sequential_run_is_recorded_and_traced() {
    let executor = Arc::new(
        ScriptedExecutor::new().respond_with(
            "research",
            AgentResponse::text("E-bike sales grew 12% last year")
                .with_tools(vec!["web_search".into()])
                .with_usage(TokenUsage::new(300, 120))
                .with_reasoning("Recent sales data was the strongest signal"),
        ),
    );
    let bus = Arc::new(EventBus::new(128));
    let tracer = Arc::new(DecisionTracer::default());
    let recorder = Recorder::new(&bus).with_configuration("process", serde_json::json!("sequential"));

    let mut swarm = Swarm::sequential()
        .with_correlation_id("run-e2e")
        .with_event_bus(bus.clone())
        .with_tracer(tracer.clone())
        .with_agent(analyst(&executor))
        .with_tasks(research_pipeline());

    let output = swarm.kickoff().await.unwrap();
    assert_eq!(output.correlation_id, "run-e2e");
    assert_eq!(output.usage.total_tasks, 3);
    assert_eq!(output.usage.token_usage.input_tokens, 300);

    let recording = recorder.finish().unwrap();
    assert_eq!(recording.correlation_id, "run-e2e");
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.summary.unique_tasks, 3);
    assert_eq!(recording.summary.total_input_tokens, output.usage.token_usage.input_tokens);
    assert_eq!(recording.summary.total_output_tokens, output.usage.token_usage.output_tokens);
    let task_time: u64 = output.tasks_output.iter().map(|o| o.duration_ms).sum();
    assert_eq!(recording.summary.total_duration_ms, task_time);
    assert_eq!(recording.summary.error_count, 0);
    assert_eq!(recording.timeline.first().unwrap().event_type, "swarm_started");
    assert_eq!(recording.timeline.last().unwrap().event_type, "swarm_completed");

    // Task events sit in child spans of the run's root span.
    let root_span = recording.timeline[0].span_id.clone().unwrap();
    let task_events = recording.timeline_for_task("analysis");
    assert_eq!(task_events.len(), 2);
    assert_eq!(task_events[0].parent_span_id.as_deref(), Some(root_span.as_str()));

    let tree = tracer.tree("run-e2e").unwrap();
    assert_eq!(tree.len(), 3);
    let research = &tree.nodes_for_task("research")[0];
    assert_eq!(research.tools_used, vec!["web_search"]);
    assert!(!research.used_prior_context());
    assert!(tree.nodes_for_task("report")[0].used_prior_context());

    let explanation = tracer.explain_workflow("run-e2e").unwrap();
    assert!(explanation.contains("3 decision(s)"));
    assert!(explanation.contains("Recent sales data was the strongest signal"));
}

#[tokio::test]
async fn test_recording_survives_json_and_replays() {
    let executor = Arc::new(ScriptedExecutor::new());
    let bus = Arc::new(EventBus::new(128));
    let recorder = Recorder::new(&bus);
    let mut swarm = Swarm::sequential()
        .with_correlation_id("run-replay")
        .with_event_bus(bus.clone())
        .with_agent(analyst(&executor))
        .with_tasks(research_pipeline());
    swarm.kickoff().await.unwrap();
    let recording = recorder.finish().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = recording.save_in(dir.path(), true).unwrap();
    assert_eq!(path, dir.path().join("run-replay.json"));
    let loaded = WorkflowRecording::load(&path).unwrap();
    assert_eq!(loaded, recording);

    let replay_bus = EventBus::new(128);
    let mut rx = replay_bus.subscribe();
    let published = loaded.replay_into(&replay_bus);
    let replayed = drain(&mut rx);
    assert_eq!(published, recording.timeline.len());
    assert_eq!(replayed.len(), published);
    assert!(replayed
        .iter()
        .all(|e| e.correlation_id.as_deref() == Some("run-replay")));

    let rebuilt = WorkflowRecording::from_events(replayed).unwrap();
    assert_eq!(rebuilt.timeline, recording.timeline);
    assert_eq!(rebuilt.summary, recording.summary);
}

#[tokio::test]
async fn test_failed_hierarchical_run_records_failure() {
    let executor = Arc::new(ScriptedExecutor::new().fail("write", "model refused"));
    let manager = Agent::new(
        AgentProfile::new("lead", "Project Lead").with_delegation(true),
        executor.clone(),
    );
    let bus = Arc::new(EventBus::new(128));
    let tracer = Arc::new(DecisionTracer::default());
    let recorder = Recorder::new(&bus).for_correlation("run-fail");

    let mut swarm = Swarm::hierarchical(manager.clone())
        .with_correlation_id("run-fail")
        .with_event_bus(bus.clone())
        .with_tracer(tracer.clone())
        .with_agents(vec![
            manager,
            Agent::new(AgentProfile::new("writer", "Technical Writer"), executor.clone()),
        ])
        .with_tasks(vec![
            crewtrace_core::task::Task::new("outline", "Outline the report"),
            crewtrace_core::task::Task::new("write", "Write the report").with_dependencies(["outline"]),
        ]);

    let err = swarm.kickoff().await.unwrap_err();
    match err {
        CrewError::Aborted {
            ref stage,
            ref partial_outputs,
            ..
        } => {
            assert_eq!(stage, "delegation of task write");
            assert_eq!(partial_outputs.len(), 1);
            assert_eq!(partial_outputs[0].task_id, "outline");
            assert_eq!(partial_outputs[0].status, TaskStatus::Completed);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.root_cause(), CrewError::Execution { .. }));

    let recording = recorder.finish().unwrap();
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(recording.timeline.last().unwrap().event_type, EventKind::SwarmFailed.as_str());
    let failures: Vec<&str> = recording
        .failures()
        .iter()
        .map(|r| r.event_type.as_str())
        .collect();
    assert_eq!(failures, vec!["task_failed", "process_failed", "swarm_failed"]);

    // Coordination plus one delegation decision and the completed outline task.
    let tree = tracer.tree("run-fail").unwrap();
    assert!(tree.nodes_for_agent("lead").len() >= 2);
    assert_eq!(tree.nodes_for_task("outline").len(), 2);
}
