use futures::future::BoxFuture;

use crate::error::Result;
use crate::task::{Task, TaskOutput};
use crate::types::{AgentProfile, AgentResponse};

/// Agent executor: the opaque capability that turns a task plus context
/// into text. Usually backed by a language model.
///
/// Implementations may be slow and may fail; they must not install or
/// restore trace contexts beyond what they record themselves
/// (timings, attributes).
pub trait AgentExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentProfile,
        task: &'a Task,
        context: &'a [TaskOutput],
    ) -> BoxFuture<'a, Result<AgentResponse>>;
}

/// Tool: a named, pluggable capability an agent can call.
///
/// Only the name matters to the engine, which uses it for tagging.
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    fn execute(
        &self,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'_, std::result::Result<String, String>>;
}
