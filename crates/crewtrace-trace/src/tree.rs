use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::DecisionNode;

/// All decisions recorded under one correlation id.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    correlation_id: String,
    swarm_id: Option<String>,
    created_at: DateTime<Utc>,
    nodes: Vec<DecisionNode>,
    by_agent: HashMap<String, Vec<usize>>,
    by_task: HashMap<String, Vec<usize>>,
    by_span: HashMap<String, Vec<usize>>,
}

/// Aggregate statistics derived from a [`DecisionTree`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub total_decisions: usize,
    pub unique_agents: usize,
    pub unique_tasks: usize,
    pub total_latency_ms: u64,
    pub average_latency_ms: f64,
    pub distinct_tools: Vec<String>,
    /// Wall-clock window from the earliest decision start to the latest
    /// decision end.
    pub total_span_duration_ms: u64,
}

impl DecisionTree {
    pub fn new(correlation_id: impl Into<String>, swarm_id: Option<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            swarm_id,
            created_at: Utc::now(),
            nodes: Vec::new(),
            by_agent: HashMap::new(),
            by_task: HashMap::new(),
            by_span: HashMap::new(),
        }
    }

    /// Append a node and index it.
    pub fn add_node(&mut self, node: DecisionNode) {
        let idx = self.nodes.len();
        self.by_agent.entry(node.agent_id.clone()).or_default().push(idx);
        self.by_task.entry(node.task_id.clone()).or_default().push(idx);
        if let Some(ref span) = node.span_id {
            self.by_span.entry(span.clone()).or_default().push(idx);
        }
        self.nodes.push(node);
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn swarm_id(&self) -> Option<&str> {
        self.swarm_id.as_deref()
    }

    pub(crate) fn set_swarm_id(&mut self, swarm_id: Option<String>) {
        if swarm_id.is_some() {
            self.swarm_id = swarm_id;
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[DecisionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&DecisionNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn nodes_for_agent(&self, agent_id: &str) -> Vec<&DecisionNode> {
        self.lookup(&self.by_agent, agent_id)
    }

    pub fn nodes_for_task(&self, task_id: &str) -> Vec<&DecisionNode> {
        self.lookup(&self.by_task, task_id)
    }

    pub fn nodes_for_span(&self, span_id: &str) -> Vec<&DecisionNode> {
        self.lookup(&self.by_span, span_id)
    }

    fn lookup<'a>(&'a self, index: &HashMap<String, Vec<usize>>, key: &str) -> Vec<&'a DecisionNode> {
        index
            .get(key)
            .map(|ids| ids.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Nodes whose parent span has no decision of its own in this tree.
    pub fn roots(&self) -> Vec<&DecisionNode> {
        self.nodes
            .iter()
            .filter(|n| match n.parent_span_id {
                Some(ref parent) => !self.by_span.contains_key(parent),
                None => true,
            })
            .collect()
    }

    /// Nodes recorded in spans directly beneath `span_id`.
    pub fn children_of(&self, span_id: &str) -> Vec<&DecisionNode> {
        self.nodes
            .iter()
            .filter(|n| n.parent_span_id.as_deref() == Some(span_id))
            .collect()
    }

    pub fn summary(&self) -> TreeSummary {
        let total_decisions = self.nodes.len();
        let total_latency_ms: u64 = self.nodes.iter().map(|n| n.latency_ms).sum();
        let average_latency_ms = if total_decisions == 0 {
            0.0
        } else {
            total_latency_ms as f64 / total_decisions as f64
        };

        let distinct_tools: BTreeSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.tools_used.iter().map(String::as_str))
            .collect();

        let earliest = self.nodes.iter().map(DecisionNode::started_at).min();
        let latest = self.nodes.iter().map(|n| n.timestamp).max();
        let total_span_duration_ms = match (earliest, latest) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        TreeSummary {
            total_decisions,
            unique_agents: self.by_agent.len(),
            unique_tasks: self.by_task.len(),
            total_latency_ms,
            average_latency_ms,
            distinct_tools: distinct_tools.into_iter().map(str::to_string).collect(),
            total_span_duration_ms,
        }
    }
}
