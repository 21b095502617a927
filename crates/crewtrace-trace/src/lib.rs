pub mod decision;
pub mod explain;
pub mod tracer;
pub mod tree;

pub use decision::{DecisionNode, DecisionNodeBuilder};
pub use explain::{explain_node, explain_tree, INSUFFICIENT_CONTEXT, NO_PRIOR_CONTEXT};
pub use tracer::DecisionTracer;
pub use tree::{DecisionTree, TreeSummary};
