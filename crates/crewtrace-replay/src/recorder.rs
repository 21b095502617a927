use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, warn};

use crewtrace_core::config::AppConfig;
use crewtrace_core::error::Result;
use crewtrace_core::event::{EventBus, EventKind, ProcessEvent};

use crate::recording::WorkflowRecording;

/// Captures a run's events from the bus into a [`WorkflowRecording`].
///
/// The recorder subscribes when it is created, so it must exist before the
/// run starts publishing. Events beyond the bus capacity are lost and
/// reported as a warning.
pub struct Recorder {
    rx: broadcast::Receiver<ProcessEvent>,
    correlation_id: Option<String>,
    configuration: BTreeMap<String, serde_json::Value>,
    save_dir: Option<PathBuf>,
    pretty: bool,
    buffered: Vec<ProcessEvent>,
}

impl Recorder {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe(),
            correlation_id: None,
            configuration: BTreeMap::new(),
            save_dir: None,
            pretty: true,
            buffered: Vec::new(),
        }
    }

    /// Recorder set up from `[recording]`: labels become configuration
    /// entries and `auto_save` enables saving under the configured dir.
    pub fn from_config(bus: &EventBus, config: &AppConfig) -> Self {
        let mut recorder = Self::new(bus);
        recorder.pretty = config.recording.pretty;
        for (key, value) in &config.recording.labels {
            recorder
                .configuration
                .insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        if config.recording.auto_save {
            recorder.save_dir = Some(config.recording_dir());
        }
        recorder
    }

    /// Only keep events carrying this correlation id.
    pub fn for_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_configuration(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Save the finished recording as `{dir}/{correlation_id}.json`.
    pub fn save_to(mut self, dir: impl Into<PathBuf>, pretty: bool) -> Self {
        self.save_dir = Some(dir.into());
        self.pretty = pretty;
        self
    }

    /// Take everything currently buffered on the bus, then build the
    /// recording (and save it when a directory is configured).
    pub fn finish(mut self) -> Result<WorkflowRecording> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.accept(event),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Recorder lagged, events dropped from recording");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        self.build()
    }

    /// Receive until the run's swarm completes or fails (or the bus
    /// closes), then build the recording. Meant to run on its own task
    /// alongside the swarm.
    pub async fn run(mut self) -> Result<WorkflowRecording> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let terminal = matches!(event.kind, EventKind::SwarmCompleted | EventKind::SwarmFailed)
                        && self.matches(&event);
                    self.accept(event);
                    if terminal {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Recorder lagged, events dropped from recording");
                }
                Err(RecvError::Closed) => {
                    debug!("EventBus closed, recorder stopping");
                    break;
                }
            }
        }
        self.build()
    }

    fn matches(&self, event: &ProcessEvent) -> bool {
        match self.correlation_id {
            Some(ref id) => event.correlation_id.as_deref() == Some(id.as_str()),
            None => true,
        }
    }

    fn accept(&mut self, event: ProcessEvent) {
        if self.matches(&event) {
            self.buffered.push(event);
        }
    }

    fn build(self) -> Result<WorkflowRecording> {
        let mut recording = WorkflowRecording::from_events(self.buffered)?;
        recording.configuration.extend(self.configuration);

        if let Some(dir) = self.save_dir {
            let path = recording.save_in(&dir, self.pretty)?;
            info!(path = %path.display(), status = %recording.status, "Recording written");
        }
        Ok(recording)
    }
}
