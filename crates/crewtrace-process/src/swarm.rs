use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crewtrace_core::context::TraceContext;
use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::event::{EventBus, EventKind};
use crewtrace_core::task::{Task, TaskOutput, TaskStatus};
use crewtrace_core::types::{new_id, TokenUsage};
use crewtrace_trace::DecisionTracer;

use crate::agent::Agent;
use crate::graph::TaskGraph;
use crate::hierarchical::{HierarchicalProcess, COORDINATION_TASK_ID};
use crate::process::{Process, ProcessOutcome};
use crate::runner::{error_type, TaskRunner};
use crate::sequential::SequentialProcess;

/// Usage counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub total_tasks: usize,
    pub delegated_tasks: usize,
    pub manager_tasks: usize,
    pub skipped_tasks: usize,
    pub token_usage: TokenUsage,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmOutput {
    pub correlation_id: String,
    pub swarm_id: String,
    /// Final output: the last task's raw text, or the manager's synthesis.
    pub raw: String,
    pub tasks_output: Vec<TaskOutput>,
    #[serde(default)]
    pub delegation_plan: Option<String>,
    pub usage: UsageMetrics,
    pub duration_ms: u64,
}

/// A set of agents working through a task graph under one strategy.
///
/// Each kickoff is one run: it validates the graph, opens a root trace
/// context, publishes lifecycle events on the bus and records decisions on
/// the tracer. Validation errors return before anything is published.
pub struct Swarm {
    id: String,
    correlation_id: Option<String>,
    process: Process,
    agents: Vec<Agent>,
    manager: Option<Agent>,
    tasks: Vec<Task>,
    event_bus: Arc<EventBus>,
    tracer: Arc<DecisionTracer>,
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("id", &self.id)
            .field("process", &self.process)
            .field("agents", &self.agents)
            .field("manager", &self.manager)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Swarm {
    pub fn new(process: Process) -> Self {
        Self {
            id: new_id(),
            correlation_id: None,
            process,
            agents: Vec::new(),
            manager: None,
            tasks: Vec::new(),
            event_bus: Arc::new(EventBus::default()),
            tracer: Arc::new(DecisionTracer::default()),
        }
    }

    pub fn sequential() -> Self {
        Self::new(Process::Sequential)
    }

    pub fn hierarchical(manager: Agent) -> Self {
        Self::new(Process::Hierarchical).with_manager(manager)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Use a fixed correlation id instead of minting one per kickoff.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_agents(mut self, agents: Vec<Agent>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn with_manager(mut self, manager: Agent) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<DecisionTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn process(&self) -> Process {
        self.process
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn tracer(&self) -> &Arc<DecisionTracer> {
        &self.tracer
    }

    /// Task ids in the order a kickoff would run them.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        crate::graph::order(&self.tasks)
    }

    /// Run every task once.
    pub async fn kickoff(&mut self) -> Result<SwarmOutput> {
        let (order, assignments) = self.prepare()?;

        let correlation_id = self.correlation_id.clone().unwrap_or_else(new_id);
        let root = TraceContext::detached_root(correlation_id.clone())
            .with_attribute("swarm_id", self.id.clone())
            .with_attribute("process", self.process.to_string());
        self.tracer.start_trace(&correlation_id, Some(&self.id));

        root.scope(self.execute(order, assignments, &correlation_id))
            .await
    }

    /// Validate the run without executing anything. Returns the resolved
    /// order plus, for sequential runs, each task's agent index.
    fn prepare(&self) -> Result<(Vec<usize>, Vec<usize>)> {
        if let Some(task) = self.tasks.iter().find(|t| t.status != TaskStatus::Pending) {
            return Err(CrewError::AlreadyExecuted {
                task_id: task.id.clone(),
                status: task.status.to_string(),
            });
        }
        let graph = TaskGraph::new(&self.tasks)?;
        let order = graph.order()?;
        let assignments = match self.process {
            Process::Sequential => graph.resolve_agents(&self.agents)?,
            Process::Hierarchical => {
                HierarchicalProcess::new(self.manager()?, &self.agents)?;
                Vec::new()
            }
        };
        Ok((order, assignments))
    }

    fn manager(&self) -> Result<&Agent> {
        self.manager.as_ref().ok_or_else(|| CrewError::AgentRequired {
            task_id: COORDINATION_TASK_ID.to_string(),
            reason: "hierarchical process needs a manager agent".into(),
        })
    }

    async fn execute(
        &mut self,
        order: Vec<usize>,
        assignments: Vec<usize>,
        correlation_id: &str,
    ) -> Result<SwarmOutput> {
        let start = Instant::now();
        let process = self.process;
        let total_tasks = self.tasks.len();
        let runner = TaskRunner::new(self.event_bus.as_ref(), self.tracer.as_ref(), &self.id);

        info!(swarm_id = %self.id, correlation_id, %process, total_tasks, "Swarm started");
        runner.publish(runner.event(
            EventKind::SwarmStarted,
            format!("Swarm {} started with {} task(s)", self.id, total_tasks),
        ));
        runner.publish(
            runner
                .event(EventKind::ProcessStarted, format!("{} process started", process))
                .with_attribute("process", process.to_string()),
        );

        let result: Result<ProcessOutcome> = match process {
            Process::Sequential => {
                SequentialProcess::new(&self.agents, assignments)
                    .run(&mut self.tasks, &order, &runner)
                    .await
            }
            Process::Hierarchical => match self.manager.as_ref() {
                Some(manager) => match HierarchicalProcess::new(manager, &self.agents) {
                    Ok(strategy) => strategy.run(&mut self.tasks, &order, &runner).await,
                    Err(e) => Err(e),
                },
                None => Err(CrewError::AgentRequired {
                    task_id: COORDINATION_TASK_ID.to_string(),
                    reason: "hierarchical process needs a manager agent".into(),
                }),
            },
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                let usage = UsageMetrics {
                    total_tasks,
                    delegated_tasks: outcome.delegated_tasks,
                    manager_tasks: outcome.manager_tasks(),
                    skipped_tasks: outcome.skipped_tasks(),
                    token_usage: outcome.token_usage(),
                };
                info!(swarm_id = %self.id, duration_ms, skipped = usage.skipped_tasks, "Swarm completed");
                // Run totals go in attributes: the task events already carry
                // the summable duration and usage fields.
                runner.publish(
                    runner
                        .event(EventKind::ProcessCompleted, format!("{} process completed", process))
                        .with_status("completed")
                        .with_attribute("run_duration_ms", duration_ms.to_string())
                        .with_attribute("input_tokens", usage.token_usage.input_tokens.to_string())
                        .with_attribute("output_tokens", usage.token_usage.output_tokens.to_string()),
                );
                runner.publish(
                    runner
                        .event(EventKind::SwarmCompleted, format!("Swarm {} completed", self.id))
                        .with_status("completed")
                        .with_attribute("run_duration_ms", duration_ms.to_string()),
                );

                Ok(SwarmOutput {
                    correlation_id: correlation_id.to_string(),
                    swarm_id: self.id.clone(),
                    raw: outcome.raw,
                    tasks_output: outcome.outputs,
                    delegation_plan: outcome.delegation_plan,
                    usage,
                    duration_ms,
                })
            }
            Err(e) => {
                let stage = match e {
                    CrewError::Aborted { ref stage, .. } => stage.clone(),
                    _ => "run".to_string(),
                };
                error!(swarm_id = %self.id, stage = %stage, error = %e, "Swarm failed");
                runner.publish(
                    runner
                        .event(
                            EventKind::ProcessFailed,
                            format!("{} process failed during {}: {}", process, stage, e.root_cause()),
                        )
                        .with_status("failed")
                        .with_error_type(error_type(&e))
                        .with_attribute("run_duration_ms", duration_ms.to_string())
                        .with_attribute("stage", stage.clone()),
                );
                runner.publish(
                    runner
                        .event(EventKind::SwarmFailed, format!("Swarm {} failed", self.id))
                        .with_status("failed")
                        .with_error_type(error_type(&e))
                        .with_attribute("run_duration_ms", duration_ms.to_string()),
                );
                Err(e)
            }
        }
    }
}
