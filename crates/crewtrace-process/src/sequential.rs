use tracing::debug;

use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::task::Task;

use crate::agent::Agent;
use crate::process::ProcessOutcome;
use crate::runner::{Dispatch, TaskRunner};

/// Runs tasks one at a time in resolved order.
///
/// `order` and `assignments` come from [`crate::graph::TaskGraph`]; this
/// type assumes they were validated. The first failure stops the run and
/// comes back as [`CrewError::Aborted`] carrying the outputs produced so far.
pub struct SequentialProcess<'a> {
    agents: &'a [Agent],
    assignments: Vec<usize>,
}

impl<'a> SequentialProcess<'a> {
    pub fn new(agents: &'a [Agent], assignments: Vec<usize>) -> Self {
        Self {
            agents,
            assignments,
        }
    }

    pub async fn run(
        &self,
        tasks: &mut [Task],
        order: &[usize],
        runner: &TaskRunner<'_>,
    ) -> Result<ProcessOutcome> {
        let mut outputs = Vec::with_capacity(order.len());
        let last = order.len().saturating_sub(1);

        for (position, &idx) in order.iter().enumerate() {
            let task = &mut tasks[idx];
            let agent = &self.agents[self.assignments[idx]];
            let dispatch = dispatch_for(task, position == last);

            match runner.run_task(task, agent, &outputs, dispatch).await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    return Err(CrewError::Aborted {
                        stage: format!("task '{}'", tasks[idx].id),
                        source: Box::new(e),
                        partial_outputs: outputs,
                    })
                }
            }
        }

        let raw = outputs.last().map(|o| o.raw.clone()).unwrap_or_default();
        Ok(ProcessOutcome {
            raw,
            outputs,
            ..Default::default()
        })
    }
}

/// Only the last task in order may leave the calling task.
pub(crate) fn dispatch_for(task: &Task, is_last: bool) -> Dispatch {
    match (task.async_execution, is_last) {
        (true, true) => Dispatch::Background,
        (true, false) => {
            debug!(task_id = %task.id, "Async task is not last in order, running inline");
            Dispatch::Inline
        }
        _ => Dispatch::Inline,
    }
}
