use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::context::TraceContext;
use crate::error::{CrewError, Result};
use crate::event::{EventBus, EventKind, ProcessEvent};
use crate::traits::Tool;

/// Registry of available tools.
///
/// Every invocation is tagged on the current trace context as a
/// `tool:<name>` timing and, when a bus is attached, published as a
/// `ToolInvoked` event.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute a tool by name.
    pub async fn invoke(
        &self,
        name: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| CrewError::ToolNotFound(name.to_string()))?;

        let start = Instant::now();
        let result = tool.execute(parameters).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        TraceContext::record_timing(format!("tool:{}", name), elapsed_ms);

        let mut event = ProcessEvent::new(EventKind::ToolInvoked, format!("Tool {} invoked", name))
            .with_tool(name)
            .with_duration(elapsed_ms);

        let outcome = match result {
            Ok(output) => {
                debug!(tool = %name, elapsed_ms, "Tool completed");
                event = event.with_status("ok");
                Ok(output)
            }
            Err(message) => {
                warn!(tool = %name, error = %message, "Tool failed");
                event = event.with_status("error").with_error_type("tool_error");
                Err(CrewError::ToolExecution {
                    tool: name.to_string(),
                    message,
                })
            }
        };

        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }

        outcome
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
