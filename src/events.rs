//! Build events broadcast to presentation consumers.
//!
//! Consumers (the CLI progress UI, tests) subscribe to an [`EventBus`] and
//! never mutate orchestrator state. Events are emitted after the transition
//! they describe has been persisted.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::classify::ErrorRecord;
use crate::materialize::{FileChange, MaterializeReport};
use crate::model::{ModuleStatus, StepType, Suggestion, TaskStatus};

/// Channel capacity. Slow consumers see `Lagged` and skip ahead.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    BuildStarted {
        project: String,
        modules: Vec<String>,
    },
    ModuleStarted {
        module: String,
        version: u32,
        tasks: usize,
    },
    TaskTransition {
        module: String,
        task: String,
        attempt: u32,
        status: TaskStatus,
    },
    /// Outcome of the `writing` step, including files written before a failure
    FilesWritten {
        module: String,
        task: String,
        attempt: u32,
        files: Vec<(String, FileChange)>,
    },
    /// Classified errors from a broken verification
    ErrorsClassified {
        module: String,
        task: String,
        attempt: u32,
        errors: Vec<ErrorRecord>,
    },
    SuggestionAdded {
        module: String,
        suggestion: Suggestion,
    },
    /// Learned duration for the step about to run, plus the remaining total
    TimerEstimate {
        step_type: StepType,
        estimate_secs: f64,
        remaining_secs: f64,
    },
    ModuleFinished {
        module: String,
        status: ModuleStatus,
    },
    BuildFinished {
        version: u32,
        changed: bool,
        cancelled: bool,
    },
}

impl BuildEvent {
    pub fn files_written(
        module: &str,
        task: &str,
        attempt: u32,
        report: &MaterializeReport,
    ) -> Self {
        BuildEvent::FilesWritten {
            module: module.to_string(),
            task: task.to_string(),
            attempt,
            files: report.files.iter().map(|f| (f.path.clone(), f.change)).collect(),
        }
    }

    /// Module the event belongs to, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            BuildEvent::ModuleStarted { module, .. }
            | BuildEvent::TaskTransition { module, .. }
            | BuildEvent::FilesWritten { module, .. }
            | BuildEvent::ErrorsClassified { module, .. }
            | BuildEvent::SuggestionAdded { module, .. }
            | BuildEvent::ModuleFinished { module, .. } => Some(module),
            _ => None,
        }
    }
}

/// Broadcast sender wrapper. Sending never fails, even without subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BuildEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: BuildEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain whatever is currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
