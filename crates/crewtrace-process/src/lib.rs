pub mod agent;
pub mod graph;
pub mod hierarchical;
pub mod process;
pub mod runner;
pub mod selection;
pub mod sequential;
pub mod swarm;

pub use agent::Agent;
pub use graph::{order, TaskGraph};
pub use hierarchical::{HierarchicalProcess, COORDINATION_TASK_ID, SYNTHESIS_TASK_ID};
pub use process::{Process, ProcessOutcome};
pub use runner::{Dispatch, TaskRunner};
pub use selection::{Selection, SelectionTier, WorkerSelector};
pub use sequential::SequentialProcess;
pub use swarm::{Swarm, SwarmOutput, UsageMetrics};
