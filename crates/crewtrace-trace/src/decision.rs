use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crewtrace_core::context::TraceContext;
use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::task::{Task, TaskOutput};
use crewtrace_core::types::{new_id, AgentProfile};

/// One decision point: an agent producing output for a task.
///
/// Nodes are built once through [`DecisionNodeBuilder`] and never changed
/// after being added to a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub node_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub agent_role: String,
    #[serde(default)]
    pub agent_goal: String,
    pub task_id: String,
    #[serde(default)]
    pub task_description: String,
    /// Prompt artifact sent to the executor, when captured.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Response artifact, when captured.
    #[serde(default)]
    pub response: Option<String>,
    /// Short summary of what was decided.
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Tasks whose output was part of the context for this decision.
    #[serde(default)]
    pub context_task_ids: Vec<String>,
    #[serde(default)]
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl DecisionNode {
    pub fn builder(agent_id: impl Into<String>, task_id: impl Into<String>) -> DecisionNodeBuilder {
        DecisionNodeBuilder::new(agent_id, task_id)
    }

    /// Builder prefilled from a finished task: agent, task, output text,
    /// tools, reasoning and duration.
    pub fn from_output(agent: &AgentProfile, task: &Task, output: &TaskOutput) -> DecisionNodeBuilder {
        let mut builder = DecisionNodeBuilder::new(&agent.id, &task.id)
            .agent_role(&agent.role)
            .agent_goal(&agent.goal)
            .task_description(&task.description)
            .decision(&output.summary)
            .response(&output.raw)
            .tools(output.tools_used.clone())
            .latency_ms(output.duration_ms);
        if let Some(ref reasoning) = output.reasoning {
            builder = builder.reasoning(reasoning);
        }
        builder
    }

    /// When the decision started, derived from its completion time and latency.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.timestamp - chrono::Duration::milliseconds(self.latency_ms as i64)
    }

    pub fn used_prior_context(&self) -> bool {
        !self.context_task_ids.is_empty()
    }
}

/// Validating builder for [`DecisionNode`].
///
/// Trace ids default to the context current at `build()` time.
#[derive(Debug, Clone)]
pub struct DecisionNodeBuilder {
    agent_id: String,
    task_id: String,
    correlation_id: Option<String>,
    span_id: Option<String>,
    parent_span_id: Option<String>,
    agent_role: String,
    agent_goal: String,
    task_description: String,
    prompt: Option<String>,
    response: Option<String>,
    decision: String,
    reasoning: Option<String>,
    tools_used: Vec<String>,
    context_task_ids: Vec<String>,
    latency_ms: u64,
    timestamp: Option<DateTime<Utc>>,
}

impl DecisionNodeBuilder {
    pub fn new(agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            correlation_id: None,
            span_id: None,
            parent_span_id: None,
            agent_role: String::new(),
            agent_goal: String::new(),
            task_description: String::new(),
            prompt: None,
            response: None,
            decision: String::new(),
            reasoning: None,
            tools_used: vec![],
            context_task_ids: vec![],
            latency_ms: 0,
            timestamp: None,
        }
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn span(mut self, span_id: impl Into<String>, parent_span_id: Option<String>) -> Self {
        self.span_id = Some(span_id.into());
        self.parent_span_id = parent_span_id;
        self
    }

    pub fn agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = role.into();
        self
    }

    pub fn agent_goal(mut self, goal: impl Into<String>) -> Self {
        self.agent_goal = goal.into();
        self
    }

    pub fn task_description(mut self, description: impl Into<String>) -> Self {
        self.task_description = description.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = decision.into();
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn context_tasks<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_task_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Result<DecisionNode> {
        if self.agent_id.trim().is_empty() {
            return Err(CrewError::InvalidDecision("agent id is empty".into()));
        }
        if self.task_id.trim().is_empty() {
            return Err(CrewError::InvalidDecision(format!(
                "task id is empty for agent '{}'",
                self.agent_id
            )));
        }

        let ambient = TraceContext::current();
        let correlation_id = self
            .correlation_id
            .or_else(|| ambient.as_ref().map(|c| c.correlation_id().to_string()));
        let (span_id, parent_span_id) = match self.span_id {
            Some(span) => (Some(span), self.parent_span_id),
            None => match ambient {
                Some(ref ctx) => (
                    Some(ctx.span_id().to_string()),
                    ctx.parent_span_id().map(str::to_string),
                ),
                None => (None, None),
            },
        };

        if span_id.is_some() && span_id == parent_span_id {
            return Err(CrewError::InvalidDecision(format!(
                "span of task '{}' is its own parent",
                self.task_id
            )));
        }

        Ok(DecisionNode {
            node_id: new_id(),
            correlation_id,
            span_id,
            parent_span_id,
            agent_id: self.agent_id,
            agent_role: self.agent_role,
            agent_goal: self.agent_goal,
            task_id: self.task_id,
            task_description: self.task_description,
            prompt: self.prompt,
            response: self.response,
            decision: self.decision,
            reasoning: self.reasoning,
            tools_used: self.tools_used,
            context_task_ids: self.context_task_ids,
            latency_ms: self.latency_ms,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewtrace_core::types::AgentResponse;

    #[test]
    fn test_builder_requires_agent_and_task() {
        assert!(matches!(
            DecisionNode::builder("", "t1").build(),
            Err(CrewError::InvalidDecision(_))
        ));
        assert!(matches!(
            DecisionNode::builder("a1", " ").build(),
            Err(CrewError::InvalidDecision(_))
        ));
    }

    #[test]
    fn test_builder_rejects_self_parented_span() {
        let err = DecisionNode::builder("a1", "t1")
            .span("s1", Some("s1".into()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("own parent"));
    }

    #[test]
    fn test_builder_reads_current_context() {
        TraceContext::create_with_correlation("run-1");
        let child = TraceContext::create_child();

        let node = DecisionNode::builder("a1", "t1").build().unwrap();
        assert_eq!(node.correlation_id.as_deref(), Some("run-1"));
        assert_eq!(node.span_id.as_deref(), Some(child.span_id()));
        assert_eq!(node.parent_span_id.as_deref(), child.parent_span_id());
        TraceContext::restore(None);
    }

    #[test]
    fn test_explicit_ids_win_over_context() {
        TraceContext::create_with_correlation("ambient");
        let node = DecisionNode::builder("a1", "t1")
            .correlation_id("explicit")
            .span("s2", Some("s1".into()))
            .build()
            .unwrap();
        assert_eq!(node.correlation_id.as_deref(), Some("explicit"));
        assert_eq!(node.span_id.as_deref(), Some("s2"));
        TraceContext::restore(None);
    }

    #[test]
    fn test_from_output() {
        let agent = AgentProfile::new("analyst", "Analyst").with_goal("Find trends");
        let task = Task::new("t1", "Analyze sales");
        let output = TaskOutput::from_response(
            &task,
            &agent,
            AgentResponse::text("Sales up")
                .with_tools(vec!["calculator".into()])
                .with_reasoning("Compared Q1 and Q2"),
            30,
        );

        let node = DecisionNode::from_output(&agent, &task, &output)
            .correlation_id("run-1")
            .build()
            .unwrap();
        assert_eq!(node.agent_goal, "Find trends");
        assert_eq!(node.response.as_deref(), Some("Sales up"));
        assert_eq!(node.reasoning.as_deref(), Some("Compared Q1 and Q2"));
        assert_eq!(node.latency_ms, 30);
        assert!(node.started_at() <= node.timestamp);
        assert!(!node.used_prior_context());
    }
}
