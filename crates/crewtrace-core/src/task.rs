//! Task records, gating conditions and task outputs.
//!
//! A task moves `Pending -> Running -> (Completed | Skipped | Failed)` and
//! never backwards; starting a task twice is an error, which is how the
//! engine guarantees at-most-once execution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CrewError, Result};
use crate::types::{AgentProfile, AgentResponse, TokenUsage};

/// Raw output recorded for a task whose gating condition was false.
pub const SKIPPED_OUTPUT: &str = "Task skipped: condition not met";

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Programmatic gating predicate over the context text.
#[derive(Clone)]
pub struct ConditionFn(pub Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl std::fmt::Debug for ConditionFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConditionFn(..)")
    }
}

/// Predicate deciding whether a task runs, evaluated against the
/// concatenated raw text of the task's context outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskCondition {
    /// Context contains the given substring.
    Contains { text: String },
    /// Context does not contain the given substring.
    NotContains { text: String },
    /// Context matches a regular expression. Invalid patterns never match.
    Matches { pattern: String },
    /// Context has any non-whitespace text.
    NotEmpty,
    #[serde(skip)]
    Predicate(ConditionFn),
}

impl TaskCondition {
    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        TaskCondition::Predicate(ConditionFn(Arc::new(f)))
    }

    pub fn evaluate(&self, context: &str) -> bool {
        match self {
            TaskCondition::Contains { text } => context.contains(text.as_str()),
            TaskCondition::NotContains { text } => !context.contains(text.as_str()),
            TaskCondition::Matches { pattern } => match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(context),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid condition pattern, treating as false");
                    false
                }
            },
            TaskCondition::NotEmpty => !context.trim().is_empty(),
            TaskCondition::Predicate(f) => (f.0)(context),
        }
    }
}

/// A single unit of work in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the submitted set.
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    /// Ids of tasks whose output this task needs, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Assigned agent id. The hierarchical strategy may resolve it later.
    #[serde(default)]
    pub agent: Option<String>,
    /// Tool names the task is expected to need.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub condition: Option<TaskCondition>,
    /// Run the executor call on a background worker (only honored for the
    /// last task in the resolved order).
    #[serde(default)]
    pub async_execution: bool,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: None,
            dependencies: vec![],
            agent: None,
            tools: vec![],
            condition: None,
            async_execution: false,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent = Some(agent_id.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_condition(mut self, condition: TaskCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.async_execution = true;
        self
    }

    /// Pending -> Running. Any other starting state means the task already ran.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(CrewError::AlreadyExecuted {
                task_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.finish(TaskStatus::Completed)
    }

    pub fn skip(&mut self) -> Result<()> {
        self.finish(TaskStatus::Skipped)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.finish(TaskStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    fn finish(&mut self, to: TaskStatus) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(CrewError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Result of running (or skipping) one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: String,
    pub description: String,
    /// First ten words of the description.
    pub summary: String,
    pub agent_id: String,
    pub agent_role: String,
    pub raw: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl TaskOutput {
    pub fn from_response(
        task: &Task,
        agent: &AgentProfile,
        response: AgentResponse,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            description: task.description.clone(),
            summary: summarize(&task.description),
            agent_id: agent.id.clone(),
            agent_role: agent.role.clone(),
            raw: response.raw,
            status: TaskStatus::Completed,
            tools_used: response.tools_used,
            usage: response.usage,
            duration_ms,
            reasoning: response.reasoning,
        }
    }

    pub fn skipped(task: &Task, agent: &AgentProfile) -> Self {
        Self {
            task_id: task.id.clone(),
            description: task.description.clone(),
            summary: summarize(&task.description),
            agent_id: agent.id.clone(),
            agent_role: agent.role.clone(),
            raw: SKIPPED_OUTPUT.to_string(),
            status: TaskStatus::Skipped,
            tools_used: vec![],
            usage: TokenUsage::default(),
            duration_ms: 0,
            reasoning: None,
        }
    }
}

fn summarize(description: &str) -> String {
    let words: Vec<&str> = description.split_whitespace().collect();
    if words.len() <= 10 {
        words.join(" ")
    } else {
        format!("{}...", words[..10].join(" "))
    }
}

/// Join context outputs the way gating conditions see them.
pub fn context_text(outputs: &[&TaskOutput]) -> String {
    outputs
        .iter()
        .map(|o| o.raw.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::new("research", "Research the market");
        assert_eq!(task.status, TaskStatus::Pending);

        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        task.complete().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.is_finished());
        assert!(task.started_at.unwrap() <= task.completed_at.unwrap());
    }

    #[test]
    fn test_task_executes_at_most_once() {
        let mut task = Task::new("t1", "Do it");
        task.start().unwrap();
        task.complete().unwrap();

        let err = task.start().unwrap_err();
        assert!(matches!(err, CrewError::AlreadyExecuted { .. }));
        assert!(err.to_string().contains("t1"));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut task = Task::new("t1", "Do it");
        task.start().unwrap();
        task.fail("upstream error").unwrap();
        assert_eq!(task.failure_reason.as_deref(), Some("upstream error"));

        assert!(matches!(
            task.complete(),
            Err(CrewError::InvalidTransition { .. })
        ));
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_skip_requires_running() {
        let mut task = Task::new("t1", "Do it");
        assert!(task.skip().is_err());
        task.start().unwrap();
        task.skip().unwrap();
        assert_eq!(task.status, TaskStatus::Skipped);
    }

    #[test]
    fn test_builder() {
        let task = Task::new("write", "Write the report")
            .with_dependencies(["research", "analysis"])
            .with_agent("writer")
            .with_expected_output("A markdown report")
            .with_tools(vec!["web_search".into()])
            .asynchronous();

        assert_eq!(task.dependencies, vec!["research", "analysis"]);
        assert_eq!(task.agent.as_deref(), Some("writer"));
        assert!(task.async_execution);
        assert_eq!(task.tools, vec!["web_search"]);
    }

    #[test]
    fn test_conditions() {
        let text = "Revenue grew 12% year over year";

        assert!(TaskCondition::Contains {
            text: "Revenue".into()
        }
        .evaluate(text));
        assert!(!TaskCondition::NotContains {
            text: "Revenue".into()
        }
        .evaluate(text));
        assert!(TaskCondition::Matches {
            pattern: r"\d+%".into()
        }
        .evaluate(text));
        assert!(!TaskCondition::Matches {
            pattern: "(unclosed".into()
        }
        .evaluate(text));
        assert!(!TaskCondition::NotEmpty.evaluate("   "));
        assert!(TaskCondition::predicate(|t| t.len() > 5).evaluate(text));
    }

    #[test]
    fn test_condition_serialization() {
        let cond = TaskCondition::Contains {
            text: "approved".into(),
        };
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains("\"type\":\"contains\""));
        let parsed: TaskCondition = serde_json::from_str(&json).unwrap();
        assert!(parsed.evaluate("approved by legal"));
    }

    #[test]
    fn test_skipped_output_uses_sentinel() {
        let task = Task::new("t1", "Summarize");
        let agent = AgentProfile::new("a1", "Writer");
        let output = TaskOutput::skipped(&task, &agent);
        assert_eq!(output.raw, SKIPPED_OUTPUT);
        assert_eq!(output.status, TaskStatus::Skipped);
    }

    #[test]
    fn test_summary_truncates_long_descriptions() {
        let task = Task::new(
            "t1",
            "one two three four five six seven eight nine ten eleven twelve",
        );
        let agent = AgentProfile::new("a1", "Writer");
        let output = TaskOutput::from_response(&task, &agent, AgentResponse::text("ok"), 5);
        assert_eq!(
            output.summary,
            "one two three four five six seven eight nine ten..."
        );
        assert_eq!(output.duration_ms, 5);
    }

    #[test]
    fn test_context_text_joins_raw_outputs() {
        let agent = AgentProfile::new("a1", "Writer");
        let a = TaskOutput::from_response(
            &Task::new("a", "A"),
            &agent,
            AgentResponse::text("first"),
            0,
        );
        let b = TaskOutput::from_response(
            &Task::new("b", "B"),
            &agent,
            AgentResponse::text("second"),
            0,
        );
        assert_eq!(context_text(&[&a, &b]), "first\nsecond");
        assert_eq!(context_text(&[]), "");
    }
}
