//! Manager-led execution: coordination pass, per-task delegation to a
//! selected worker, synthesis pass.

use tracing::{info, warn};

use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::task::{Task, TaskOutput};
use crewtrace_core::types::AgentProfile;
use crewtrace_trace::DecisionNode;

use crate::agent::Agent;
use crate::process::ProcessOutcome;
use crate::runner::{Dispatch, TaskRunner};
use crate::selection::{Selection, WorkerSelector};
use crate::sequential::dispatch_for;

pub const COORDINATION_TASK_ID: &str = "manager:coordination";
pub const SYNTHESIS_TASK_ID: &str = "manager:synthesis";

pub struct HierarchicalProcess<'a> {
    manager: &'a Agent,
    workers: Vec<&'a Agent>,
}

impl<'a> HierarchicalProcess<'a> {
    /// Split the pool into manager and workers. The manager never works,
    /// even if it was also passed in `agents`.
    pub fn new(manager: &'a Agent, agents: &'a [Agent]) -> Result<Self> {
        if !manager.allows_delegation() {
            return Err(CrewError::DelegationDisabled {
                agent_id: manager.id().to_string(),
            });
        }
        let workers: Vec<&Agent> = agents.iter().filter(|a| a.id() != manager.id()).collect();
        if workers.is_empty() {
            return Err(CrewError::EmptyWorkerPool {
                manager: manager.id().to_string(),
            });
        }
        Ok(Self { manager, workers })
    }

    pub fn workers(&self) -> &[&'a Agent] {
        &self.workers
    }

    pub async fn run(
        &self,
        tasks: &mut [Task],
        order: &[usize],
        runner: &TaskRunner<'_>,
    ) -> Result<ProcessOutcome> {
        let mut outcome = ProcessOutcome::default();

        let mut coordination = self.coordination_task(tasks, order);
        let plan = runner
            .run_task(&mut coordination, self.manager, &[], Dispatch::Inline)
            .await
            .map_err(|e| aborted("coordination", e, &outcome))?;
        info!(manager = %self.manager.role(), "Delegation plan ready");
        outcome.delegation_plan = Some(plan.raw.clone());
        outcome.manager_outputs.push(plan);

        let profiles: Vec<&AgentProfile> = self.workers.iter().map(|w| w.profile()).collect();
        let mut selector = WorkerSelector::new();
        let last = order.len().saturating_sub(1);

        for (position, &idx) in order.iter().enumerate() {
            let selection = selector.select(&tasks[idx], &profiles);
            let worker = self.workers[selection.worker];
            self.record_delegation(runner, &tasks[idx], worker, &selection);

            let task = &mut tasks[idx];
            task.agent = Some(worker.id().to_string());
            let dispatch = dispatch_for(task, position == last);

            match runner.run_task(task, worker, &outcome.outputs, dispatch).await {
                Ok(output) => {
                    outcome.delegated_tasks += 1;
                    outcome.outputs.push(output);
                }
                Err(e) => {
                    let stage = format!("delegation of task {}", tasks[idx].id);
                    return Err(aborted(&stage, e, &outcome));
                }
            }
        }

        let mut synthesis = self.synthesis_task(&outcome.outputs);
        let final_output = runner
            .run_task(&mut synthesis, self.manager, &outcome.outputs, Dispatch::Inline)
            .await
            .map_err(|e| aborted("synthesis", e, &outcome))?;
        outcome.raw = final_output.raw.clone();
        outcome.manager_outputs.push(final_output);

        Ok(outcome)
    }

    fn coordination_task(&self, tasks: &[Task], order: &[usize]) -> Task {
        let mut description = String::from("Plan the delegation of these tasks:");
        for &idx in order {
            description.push_str(&format!("\n- {}: {}", tasks[idx].id, tasks[idx].description));
        }
        description.push_str("\nAvailable workers:");
        for worker in &self.workers {
            description.push_str(&format!("\n- {} ({})", worker.role(), worker.id()));
        }
        Task::new(COORDINATION_TASK_ID, description).with_agent(self.manager.id())
    }

    fn synthesis_task(&self, outputs: &[TaskOutput]) -> Task {
        let ids: Vec<&str> = outputs.iter().map(|o| o.task_id.as_str()).collect();
        Task::new(
            SYNTHESIS_TASK_ID,
            format!("Synthesize the final result from the outputs of: {}", ids.join(", ")),
        )
        .with_agent(self.manager.id())
    }

    fn record_delegation(&self, runner: &TaskRunner<'_>, task: &Task, worker: &Agent, selection: &Selection) {
        if !runner.tracer().is_enabled() {
            return;
        }
        let manager = self.manager.profile();
        let node = DecisionNode::builder(&manager.id, &task.id)
            .agent_role(&manager.role)
            .agent_goal(&manager.goal)
            .task_description(&task.description)
            .decision(format!("Delegated task '{}' to {} ({})", task.id, worker.role(), worker.id()))
            .reasoning(selection.reasoning(task, worker.profile()))
            .context_tasks([COORDINATION_TASK_ID])
            .build();
        match node {
            Ok(node) => {
                runner.tracer().record_decision(node);
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Could not record delegation"),
        }
    }
}

fn aborted(stage: &str, source: CrewError, outcome: &ProcessOutcome) -> CrewError {
    CrewError::Aborted {
        stage: stage.to_string(),
        source: Box::new(source),
        partial_outputs: outcome.outputs.clone(),
    }
}
