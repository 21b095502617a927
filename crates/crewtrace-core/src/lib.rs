pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod task;
pub mod tools;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::{SpanGuard, TraceContext};
pub use error::{CrewError, Result};
pub use event::{EventBus, EventKind, ProcessEvent};
pub use task::{Task, TaskCondition, TaskOutput, TaskStatus, SKIPPED_OUTPUT};
pub use tools::ToolRegistry;
pub use traits::{AgentExecutor, Tool};
pub use types::*;
