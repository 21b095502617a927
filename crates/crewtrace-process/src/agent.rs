use std::sync::Arc;

use crewtrace_core::error::Result;
use crewtrace_core::task::{Task, TaskOutput};
use crewtrace_core::traits::AgentExecutor;
use crewtrace_core::types::{AgentProfile, AgentResponse};

/// An agent taking part in a run: its profile plus the executor that
/// does its work.
#[derive(Clone)]
pub struct Agent {
    profile: AgentProfile,
    executor: Arc<dyn AgentExecutor>,
}

impl Agent {
    pub fn new(profile: AgentProfile, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { profile, executor }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn role(&self) -> &str {
        &self.profile.role
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn allows_delegation(&self) -> bool {
        self.profile.allow_delegation
    }

    pub fn executor(&self) -> Arc<dyn AgentExecutor> {
        self.executor.clone()
    }

    /// Run the executor for `task` with the given context outputs.
    pub async fn execute(&self, task: &Task, context: &[TaskOutput]) -> Result<AgentResponse> {
        self.executor.execute(&self.profile, task, context).await
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.profile.id)
            .field("role", &self.profile.role)
            .finish_non_exhaustive()
    }
}
