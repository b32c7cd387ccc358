//! Progress Bus (§6.2, §6.3): the ordered stream of `ProgressEvent`s the
//! engine yields to the caller, terminated by exactly one `FinalEvent`.
//!
//! Modeled as a bounded `tokio::sync::mpsc` channel, single-producer (the
//! executor serializes its own emissions) single-consumer, matching §9's
//! "Coroutine→stream mapping" note: the public surface is a finite stream of
//! one uniform item type, not a callback API. `FinalEvent` rides along as a
//! variant of [`StreamItem`] so callers never juggle two types.

use super::types::{AgentResponse, NormalizedSource, RetryRecord};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Color the UI layer should render a task pill in, per §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskColor {
    Primary,
    Success,
    Danger,
}

impl TaskColor {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            TaskColor::Primary => "primary",
            TaskColor::Success => "success",
            TaskColor::Danger => "danger",
        }
    }
}

/// UI-facing flattened view of one `Task`, one entry per task in
/// `formatted_tasks` (§3.7, §6.2).
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_name: String,
    pub purpose: String,
    pub agent: String,
    pub task_index: usize,
    /// Per-tool message, 1-indexed to match the UI contract in §6.2.
    pub messages: HashMap<String, String>,
    pub status: String,
    pub severity: String,
    pub color: TaskColor,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_attempts: u32,
    pub retry_history: Vec<RetryRecord>,
    pub result: Option<AgentResponse>,
    pub error: Option<String>,
    pub last_error: Option<String>,
}

/// The `task_status_update` sub-object carried on some progress events.
#[derive(Debug, Clone)]
pub struct TaskStatusUpdate {
    pub update_type: String,
    pub task_index: Option<usize>,
    pub status: Option<String>,
    pub color: Option<TaskColor>,
    pub attempt: Option<u32>,
    pub enhanced_success: Option<bool>,
}

/// One intermediate state snapshot emitted during execution.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub node: String,
    pub processing_status: String,
    pub progress_percentage: f32,
    pub progress_message: String,
    pub current_step: String,
    pub total_steps: u32,
    pub formatted_tasks: Vec<TaskView>,
    pub task_status_update: Option<TaskStatusUpdate>,
    pub timestamp: f64,
}

/// The single terminal event, distinct from intermediate `ProgressEvent`s.
#[derive(Debug, Clone)]
pub struct FinalEvent {
    pub final_response: String,
    pub final_sources: Vec<NormalizedSource>,
    pub processing_status: String,
    pub metadata: FinalMetadata,
    pub detected_language: String,
}

#[derive(Debug, Clone, Default)]
pub struct FinalMetadata {
    pub domains: Vec<String>,
    pub quality_score: f32,
    pub processing_time_seconds: f64,
    pub total_documents: usize,
}

/// One item on the engine's output stream: either an intermediate progress
/// snapshot or the terminal event. Every stream has exactly one `Final` item
/// and it is always last (Testable Property 8).
#[derive(Debug, Clone)]
pub enum StreamItem {
    Progress(ProgressEvent),
    Final(FinalEvent),
}

/// Producer handle for the progress bus. Cloning is cheap (wraps an
/// `mpsc::Sender`); the executor clones one per spawned task so each task's
/// own coroutine can emit without synchronizing with its siblings.
#[derive(Clone)]
pub struct ProgressBus {
    tx: mpsc::Sender<StreamItem>,
}

/// Consumer handle. Exactly one exists per run; the orchestrator entry owns
/// it and turns it into the public-facing stream.
pub struct ProgressBusReceiver {
    rx: mpsc::Receiver<StreamItem>,
}

impl ProgressBus {
    /// Build a bounded channel of the given capacity (§6.6
    /// `PROGRESS_QUEUE_CAPACITY`, default 64; §5 backpressure: producers await
    /// on a full queue rather than dropping events while a consumer exists).
    pub fn new(capacity: usize) -> (Self, ProgressBusReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ProgressBusReceiver { rx })
    }

    /// Emit a progress event. If the consumer has disappeared the send fails
    /// silently — per §5, a dropped consumer must not fail the run.
    pub async fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(StreamItem::Progress(event)).await;
    }

    /// Emit the run's one and only terminal event.
    pub async fn emit_final(&self, event: FinalEvent) {
        let _ = self.tx.send(StreamItem::Final(event)).await;
    }
}

impl ProgressBusReceiver {
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}
