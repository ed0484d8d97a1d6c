//! Progress events published while a run executes

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::{Stage, TaskStatus};
use crate::types::{RunId, TaskId};

/// Something observable happened in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
    },
    StageEntered {
        run_id: RunId,
        stage: Stage,
    },
    /// The run suspended with a question for the user
    ClarificationRequested {
        run_id: RunId,
        question: String,
    },
    RoundStarted {
        run_id: RunId,
        round: u32,
        tasks: Vec<TaskId>,
    },
    TaskFinished {
        run_id: RunId,
        task_id: TaskId,
        status: TaskStatus,
    },
    RoundCompleted {
        run_id: RunId,
        round: u32,
        findings: usize,
    },
    RunCompleted {
        run_id: RunId,
    },
    RunFailed {
        run_id: RunId,
        stage: Stage,
        message: String,
    },
}

/// Sending half handed to the orchestrator.
///
/// A sink with no channel, or whose receiver was dropped, discards events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Client-side receiver for run events
#[derive(Clone)]
pub struct RunChannel {
    event_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RunEvent>>>,
}

impl RunChannel {
    /// Create a connected channel and sink
    pub fn new() -> (Self, EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            event_rx: Arc::new(tokio::sync::Mutex::new(rx)),
        };
        (channel, EventSink { tx: Some(tx) })
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<RunEvent> {
        self.event_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the next event. `None` once every sink is dropped.
    pub async fn recv(&self) -> Option<RunEvent> {
        self.event_rx.lock().await.recv().await
    }

    /// Everything currently queued
    pub fn drain(&self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
