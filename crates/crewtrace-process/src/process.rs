use serde::{Deserialize, Serialize};

use crewtrace_core::task::{TaskOutput, TaskStatus};
use crewtrace_core::types::TokenUsage;

/// Execution strategy for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    /// Tasks run one after another with their assigned (or fallback) agent.
    #[default]
    Sequential,
    /// A manager plans, delegates each task to a worker, then synthesizes.
    Hierarchical,
}

impl std::fmt::Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Process::Sequential => f.write_str("sequential"),
            Process::Hierarchical => f.write_str("hierarchical"),
        }
    }
}

/// What a strategy hands back to the swarm.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Final output text.
    pub raw: String,
    /// Task outputs in execution order.
    pub outputs: Vec<TaskOutput>,
    /// Coordination and synthesis outputs (hierarchical only).
    pub manager_outputs: Vec<TaskOutput>,
    pub delegation_plan: Option<String>,
    pub delegated_tasks: usize,
}

impl ProcessOutcome {
    pub fn manager_tasks(&self) -> usize {
        self.manager_outputs.len()
    }

    pub fn skipped_tasks(&self) -> usize {
        self.outputs
            .iter()
            .filter(|o| o.status == TaskStatus::Skipped)
            .count()
    }

    /// Token usage across task and manager outputs.
    pub fn token_usage(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for output in self.outputs.iter().chain(&self.manager_outputs) {
            usage.add(output.usage);
        }
        usage
    }
}
