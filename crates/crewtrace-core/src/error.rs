use thiserror::Error;

use crate::task::TaskOutput;

#[derive(Debug, Error)]
pub enum CrewError {
    // Configuration errors (fatal before any execution)
    #[error("Task set is empty: at least one task is required")]
    EmptyTaskSet,

    #[error("Task '{task_id}' depends on non-existent task '{dependency}'")]
    MissingDependency { task_id: String, dependency: String },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Circular dependency detected among tasks: {}", .task_ids.join(", "))]
    CircularDependency { task_ids: Vec<String> },

    #[error("An agent is required for task '{task_id}': {reason}")]
    AgentRequired { task_id: String, reason: String },

    #[error("Manager agent '{agent_id}' must allow delegation")]
    DelegationDisabled { agent_id: String },

    #[error("Hierarchical process requires at least one worker agent besides manager '{manager}'")]
    EmptyWorkerPool { manager: String },

    // Execution errors
    #[error("Task '{task_id}' has already been executed (status: {status})")]
    AlreadyExecuted { task_id: String, status: String },

    #[error("Invalid status transition for task '{task_id}': {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Agent execution failed for task '{task_id}': {message}")]
    Execution { task_id: String, message: String },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Background execution of task '{task_id}' did not complete: {message}")]
    Join { task_id: String, message: String },

    #[error("Run aborted during {stage}: {source}")]
    Aborted {
        stage: String,
        #[source]
        source: Box<CrewError>,
        partial_outputs: Vec<TaskOutput>,
    },

    // Recording errors
    #[error("Cannot build a recording from an empty event stream")]
    EmptyEventStream,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid decision record: {0}")]
    InvalidDecision(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrewError {
    /// Whether this error was raised while validating a run, before any
    /// task was executed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CrewError::EmptyTaskSet
                | CrewError::MissingDependency { .. }
                | CrewError::DuplicateTask(_)
                | CrewError::CircularDependency { .. }
                | CrewError::AgentRequired { .. }
                | CrewError::DelegationDisabled { .. }
                | CrewError::EmptyWorkerPool { .. }
                | CrewError::Config(_)
                | CrewError::ConfigNotFound(_)
        )
    }

    /// Outputs produced before an aborted run stopped. Empty for every
    /// other variant.
    pub fn partial_outputs(&self) -> &[TaskOutput] {
        match self {
            CrewError::Aborted {
                partial_outputs, ..
            } => partial_outputs,
            _ => &[],
        }
    }

    /// The innermost error, unwrapping `Aborted`.
    pub fn root_cause(&self) -> &CrewError {
        match self {
            CrewError::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrewError>;
