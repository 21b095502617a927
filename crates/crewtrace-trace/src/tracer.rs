use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crewtrace_core::config::TracingConfig;
use crewtrace_core::context::TraceContext;

use crate::decision::DecisionNode;
use crate::explain::{explain_node, explain_tree};
use crate::tree::{DecisionTree, TreeSummary};

type SharedTree = Arc<RwLock<DecisionTree>>;

/// Collects decision nodes into one [`DecisionTree`] per correlation id.
///
/// Safe to share across spans and tasks. Each append takes the owning
/// tree's write lock once for both the push and the indexing, so readers
/// never see a node that is only partly indexed. Every operation is a no-op
/// when tracing is disabled.
pub struct DecisionTracer {
    enabled: bool,
    capture_artifacts: bool,
    traces: RwLock<HashMap<String, SharedTree>>,
}

impl DecisionTracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            capture_artifacts: true,
            traces: RwLock::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn from_config(config: &TracingConfig) -> Self {
        Self::new(config.enabled).with_artifacts(config.capture_artifacts)
    }

    /// Keep or drop prompt/response artifacts on recorded nodes.
    pub fn with_artifacts(mut self, capture: bool) -> Self {
        self.capture_artifacts = capture;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Allocate an empty tree for a run. An existing tree keeps its nodes.
    pub fn start_trace(&self, correlation_id: &str, swarm_id: Option<&str>) {
        if !self.enabled {
            return;
        }
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        match traces.get(correlation_id) {
            Some(tree) => tree
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .set_swarm_id(swarm_id.map(str::to_string)),
            None => {
                traces.insert(
                    correlation_id.to_string(),
                    Arc::new(RwLock::new(DecisionTree::new(
                        correlation_id,
                        swarm_id.map(str::to_string),
                    ))),
                );
            }
        }
        debug!(correlation_id, "Decision trace started");
    }

    /// Append a node to its run's tree.
    ///
    /// The tree is chosen by the node's correlation id, or the current trace
    /// context's when the node has none. Returns the correlation id used, or
    /// `None` when tracing is off or no id could be resolved.
    pub fn record_decision(&self, mut node: DecisionNode) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let correlation_id = match node
            .correlation_id
            .clone()
            .or_else(TraceContext::current_correlation_id)
        {
            Some(id) => id,
            None => {
                warn!(task_id = %node.task_id, "Dropping decision without correlation id");
                return None;
            }
        };
        node.correlation_id = Some(correlation_id.clone());
        if !self.capture_artifacts {
            node.prompt = None;
            node.response = None;
        }

        let tree = self.tree_or_insert(&correlation_id);
        tree.write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_node(node);
        Some(correlation_id)
    }

    fn tree_or_insert(&self, correlation_id: &str) -> SharedTree {
        if let Some(tree) = self.shared(correlation_id) {
            return tree;
        }
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        traces
            .entry(correlation_id.to_string())
            .or_insert_with(|| {
                debug!(correlation_id, "Allocating decision tree on first record");
                Arc::new(RwLock::new(DecisionTree::new(correlation_id, None)))
            })
            .clone()
    }

    fn shared(&self, correlation_id: &str) -> Option<SharedTree> {
        self.traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(correlation_id)
            .cloned()
    }

    fn with_tree<R>(&self, correlation_id: &str, f: impl FnOnce(&DecisionTree) -> R) -> Option<R> {
        if !self.enabled {
            return None;
        }
        let tree = self.shared(correlation_id)?;
        let guard = tree.read().unwrap_or_else(PoisonError::into_inner);
        Some(f(&guard))
    }

    /// Snapshot of a run's tree.
    pub fn tree(&self, correlation_id: &str) -> Option<DecisionTree> {
        self.with_tree(correlation_id, DecisionTree::clone)
    }

    pub fn summary(&self, correlation_id: &str) -> Option<TreeSummary> {
        self.with_tree(correlation_id, DecisionTree::summary)
    }

    pub fn explain_decision(&self, correlation_id: &str, node_id: &str) -> Option<String> {
        self.with_tree(correlation_id, |tree| tree.node(node_id).map(explain_node))
            .flatten()
    }

    pub fn explain_workflow(&self, correlation_id: &str) -> Option<String> {
        self.with_tree(correlation_id, explain_tree)
    }

    /// Drop a run's tree. Returns whether one existed.
    pub fn cleanup(&self, correlation_id: &str) -> bool {
        let removed = self
            .traces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(correlation_id)
            .is_some();
        if removed {
            debug!(correlation_id, "Decision trace removed");
        }
        removed
    }

    /// Correlation ids with a live tree, sorted.
    pub fn active_traces(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl Default for DecisionTracer {
    fn default() -> Self {
        Self::new(true)
    }
}
