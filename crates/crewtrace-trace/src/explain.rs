//! Plain-text explanations rendered from stored decision fields.

use crate::decision::DecisionNode;
use crate::tree::DecisionTree;

pub const INSUFFICIENT_CONTEXT: &str = "Insufficient context to explain this decision.";
pub const NO_PRIOR_CONTEXT: &str = "No prior context was used.";

/// Explain one decision. Output depends only on the node's fields.
pub fn explain_node(node: &DecisionNode) -> String {
    let mut lines = Vec::new();

    if !node.agent_role.is_empty() {
        lines.push(format!(
            "Agent '{}' ({}) acted on task '{}'.",
            node.agent_role, node.agent_id, node.task_id
        ));
    }
    if !node.agent_goal.is_empty() {
        lines.push(format!("Its goal was: {}.", node.agent_goal.trim_end_matches('.')));
    }
    let context_at = lines.len();
    if node.used_prior_context() {
        lines.push(format!(
            "Prior context influenced this step: output of {}.",
            node.context_task_ids.join(", ")
        ));
    }
    if !node.tools_used.is_empty() {
        lines.push(format!("Tools used: {}.", node.tools_used.join(", ")));
    }
    if let Some(reasoning) = node.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
        lines.push(format!("Stated reasoning: {}", reasoning.trim()));
    }

    if lines.is_empty() {
        return INSUFFICIENT_CONTEXT.to_string();
    }
    if !node.used_prior_context() {
        lines.insert(context_at, NO_PRIOR_CONTEXT.to_string());
    }
    lines.join("\n")
}

/// Explain a whole run, one numbered section per decision in recording order.
pub fn explain_tree(tree: &DecisionTree) -> String {
    if tree.is_empty() {
        return format!("Workflow {}: no decisions recorded.", tree.correlation_id());
    }

    let summary = tree.summary();
    let mut out = format!(
        "Workflow {}: {} decision(s) by {} agent(s) across {} task(s), {} ms total latency.",
        tree.correlation_id(),
        summary.total_decisions,
        summary.unique_agents,
        summary.unique_tasks,
        summary.total_latency_ms
    );

    for (i, node) in tree.nodes().iter().enumerate() {
        out.push_str(&format!("\n\n{}. Task '{}'", i + 1, node.task_id));
        if !node.decision.is_empty() {
            out.push_str(&format!(": {}", node.decision));
        }
        for line in explain_node(node).lines() {
            out.push_str("\n   ");
            out.push_str(line);
        }
    }
    out
}
