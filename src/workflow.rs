//! Workflow files: agents and tasks described in TOML.
//!
//! ```toml
//! process = "hierarchical"
//! manager = "lead"
//!
//! [[agents]]
//! id = "lead"
//! role = "Project Lead"
//! allow_delegation = true
//!
//! [[tasks]]
//! id = "research"
//! description = "Research the market"
//! tools = ["web_search"]
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::warn;

use crewtrace_core::config::expand_env_vars;
use crewtrace_core::error::Result as CrewResult;
use crewtrace_core::event::EventBus;
use crewtrace_core::task::{Task, TaskCondition, TaskOutput};
use crewtrace_core::tools::ToolRegistry;
use crewtrace_core::traits::{AgentExecutor, Tool};
use crewtrace_core::types::{AgentProfile, AgentResponse};
use crewtrace_process::{Agent, Process, Swarm};
use crewtrace_trace::DecisionTracer;

#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub process: Process,
    /// Agent id of the manager (hierarchical only).
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub condition: Option<TaskCondition>,
    #[serde(default, rename = "async")]
    pub async_execution: bool,
}

impl TaskEntry {
    pub fn to_task(&self) -> Task {
        let mut task = Task::new(&self.id, &self.description)
            .with_dependencies(self.dependencies.iter().cloned())
            .with_tools(self.tools.clone());
        task.expected_output = self.expected_output.clone();
        task.agent = self.agent.clone();
        task.condition = self.condition.clone();
        task.async_execution = self.async_execution;
        task
    }
}

impl WorkflowFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading workflow {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing workflow {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(&expand_env_vars(content))?)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(TaskEntry::to_task).collect()
    }

    /// Assemble a swarm where every agent uses `executor`.
    pub fn build_swarm(
        &self,
        executor: Arc<dyn AgentExecutor>,
        bus: Arc<EventBus>,
        tracer: Arc<DecisionTracer>,
    ) -> anyhow::Result<Swarm> {
        let agents: Vec<Agent> = self
            .agents
            .iter()
            .map(|profile| Agent::new(profile.clone(), executor.clone()))
            .collect();

        let mut swarm = Swarm::new(self.process)
            .with_event_bus(bus)
            .with_tracer(tracer)
            .with_tasks(self.tasks());

        if self.process == Process::Hierarchical {
            let manager_id = self
                .manager
                .as_deref()
                .context("hierarchical workflows must name a `manager` agent")?;
            let manager = agents
                .iter()
                .find(|a| a.id() == manager_id)
                .cloned()
                .with_context(|| format!("manager '{}' is not listed under [[agents]]", manager_id))?;
            swarm = swarm.with_manager(manager);
        }

        Ok(swarm.with_agents(agents))
    }
}

/// Tool stand-in for dry runs: reports the call instead of performing it.
struct DryRunTool {
    name: String,
}

impl Tool for DryRunTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'_, std::result::Result<String, String>> {
        Box::pin(async move {
            let task = parameters.get("task").and_then(|v| v.as_str()).unwrap_or("?");
            Ok(format!("{} skipped for task {} (dry run)", self.name, task))
        })
    }
}

/// Executor for dry runs: describes what each agent would do without
/// calling a model. Task tools go through a [`ToolRegistry`] of stand-ins,
/// so tool invocations still show up on the bus and in span timings.
pub struct DryRunExecutor {
    tools: ToolRegistry,
}

impl DryRunExecutor {
    pub fn new(workflow: &WorkflowFile, bus: Arc<EventBus>) -> Self {
        let mut tools = ToolRegistry::new().with_event_bus(bus);
        let names = workflow
            .agents
            .iter()
            .flat_map(|a| a.tools.iter())
            .chain(workflow.tasks.iter().flat_map(|t| t.tools.iter()));
        for name in names {
            if tools.get(name).is_none() {
                tools.register(DryRunTool { name: name.clone() });
            }
        }
        Self { tools }
    }
}

impl AgentExecutor for DryRunExecutor {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentProfile,
        task: &'a Task,
        context: &'a [TaskOutput],
    ) -> BoxFuture<'a, CrewResult<AgentResponse>> {
        Box::pin(async move {
            let mut used = Vec::new();
            for name in &task.tools {
                let mut params = serde_json::Map::new();
                params.insert("task".into(), serde_json::Value::String(task.id.clone()));
                match self.tools.invoke(name, params).await {
                    Ok(_) => used.push(name.clone()),
                    Err(e) => warn!(tool = %name, error = %e, "Dry-run tool call failed"),
                }
            }

            let mut raw = format!("[{}] {}", agent.role, task.description);
            if let Some(ref expected) = task.expected_output {
                raw.push_str(&format!(" -> {}", expected));
            }
            let reasoning = if context.is_empty() {
                "Dry run: no prior output was available.".to_string()
            } else {
                let ids: Vec<&str> = context.iter().map(|o| o.task_id.as_str()).collect();
                format!("Dry run: built on the output of {}.", ids.join(", "))
            };
            Ok(AgentResponse::text(raw).with_tools(used).with_reasoning(reasoning))
        })
    }
}
