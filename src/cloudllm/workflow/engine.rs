//! Orchestrator entry (§5, §6.1): builds the initial `WorkflowState` from a
//! `RunRequest`, drives the node→router→node loop to termination, and owns
//! the `ProgressBus` + cancellation signal for one run.

use super::conflict::ConflictResolutionNode;
use super::config::EngineConfig;
use super::error_node::ErrorNode;
use super::executor::{AgentExecutor, ExecutorNode};
use super::final_response::FinalResponseNode;
use super::progress::{FinalEvent, FinalMetadata, ProgressBus, ProgressBusReceiver, ProgressEvent};
use super::providers::LlmProvider;
use super::reflection::ReflectionNode;
use super::registry::AgentRegistry;
use super::router::{route, NextNode};
use super::state::{NextAction, WorkflowState};
use super::types::RunRequest;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

/// Handle returned by [`WorkflowEngine::run`]: the progress stream plus a
/// cancellation switch.
pub struct RunHandle {
    pub receiver: ProgressBusReceiver,
    cancel_tx: watch::Sender<bool>,
}

impl RunHandle {
    /// Request cancellation. Take effect at the run's next suspension point
    /// (§5); already-completed task results are preserved.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// The workflow engine: one instance per tenant/process, many concurrent
/// runs (each `run` call gets its own scheduler instance per §5).
pub struct WorkflowEngine {
    registry: Arc<AgentRegistry>,
    llm_provider: Arc<dyn LlmProvider>,
    agent_executor: Arc<dyn AgentExecutor>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        llm_provider: Arc<dyn LlmProvider>,
        agent_executor: Arc<dyn AgentExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            llm_provider,
            agent_executor,
            config,
        }
    }

    /// Start one run. Spawns the drive loop onto the runtime and returns
    /// immediately with the stream + cancellation handle.
    pub fn run(&self, request: RunRequest) -> RunHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (bus, receiver) = ProgressBus::new(self.config.progress_queue_capacity);

        let registry = self.registry.clone();
        let provider = self.llm_provider.clone();
        let executor = self.agent_executor.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            drive(request, registry, provider, executor, config, bus, cancel_rx).await;
        });

        RunHandle { receiver, cancel_tx }
    }
}

async fn drive(
    request: RunRequest,
    registry: Arc<AgentRegistry>,
    provider: Arc<dyn LlmProvider>,
    agent_executor: Arc<dyn AgentExecutor>,
    config: EngineConfig,
    bus: ProgressBus,
    cancel_rx: watch::Receiver<bool>,
) {
    let tenant_current_datetime = request
        .tenant_current_datetime
        .clone()
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let mut state = WorkflowState::initial(
        request.query,
        request.messages,
        request.user_context,
        request.tenant_timezone,
        tenant_current_datetime,
    );

    let reflection = ReflectionNode::new(provider.clone(), registry.clone(), config.clone());
    let conflict = ConflictResolutionNode::new(provider.clone(), config.clone());
    let error_node = ErrorNode::new(provider.clone(), config.clone());
    let final_node = FinalResponseNode::new();

    loop {
        if *cancel_rx.borrow() {
            state.error_message = Some("workflow run was cancelled".to_string());
            state.exception_type = Some("Cancelled".to_string());
            let patch = error_node.run(&state).await;
            state.merge(patch);
            bus.emit(progress_event_from_state(&state, "error_node")).await;
            break;
        }

        match route(&state) {
            NextNode::Terminate => break,
            NextNode::Reflection => {
                match reflection.run(&state).await {
                    Ok(patch) => state.merge(patch),
                    Err(e) => {
                        state.current_step = "reflection".to_string();
                        state.next_action = NextAction::Error;
                        state.error_message = Some(e.technical_message());
                        state.exception_type = Some(e.exception_type().to_string());
                    }
                }
                bus.emit(progress_event_from_state(&state, "reflection")).await;
            }
            NextNode::Executor => {
                let executor_node =
                    ExecutorNode::new(agent_executor.clone(), bus.clone(), config.clone(), cancel_rx.clone());
                match executor_node.run(&state).await {
                    Ok(patch) => state.merge(patch),
                    Err(e) => {
                        state.current_step = "executor".to_string();
                        state.next_action = NextAction::Error;
                        state.error_message = Some(e.technical_message());
                        state.exception_type = Some(e.exception_type().to_string());
                    }
                }
            }
            NextNode::ConflictResolver => {
                state.current_step = "conflict_resolver".to_string();
                match conflict.run(&state).await {
                    Ok(patch) => state.merge(patch),
                    Err(e) => {
                        log::warn!("conflict resolution node failed, proceeding to final response: {}", e.technical_message());
                        state.next_action = NextAction::FinalResponse;
                    }
                }
                bus.emit(progress_event_from_state(&state, "conflict_resolver")).await;
            }
            NextNode::FinalResponse => {
                let patch = final_node.run(&state);
                state.merge(patch);
                bus.emit(progress_event_from_state(&state, "final_response")).await;
            }
            NextNode::ErrorHandler => {
                let patch = error_node.run(&state).await;
                state.merge(patch);
                bus.emit(progress_event_from_state(&state, "error_node")).await;
            }
        }
    }

    let final_event = FinalEvent {
        final_response: state.final_response.clone().unwrap_or_default(),
        final_sources: state.final_sources.clone(),
        processing_status: state.processing_status.as_wire_str().to_string(),
        metadata: build_final_metadata(&state),
        detected_language: state
            .semantic_routing
            .as_ref()
            .map(|r| r.detected_language.clone())
            .unwrap_or_else(|| "english".to_string()),
    };
    bus.emit_final(final_event).await;
}

/// Builds an intermediate [`ProgressEvent`] from the merged state after a
/// non-executor node runs. The executor emits its own fine-grained snapshots
/// internally and is excluded here.
fn progress_event_from_state(state: &WorkflowState, node: &str) -> ProgressEvent {
    ProgressEvent {
        node: node.to_string(),
        processing_status: state.processing_status.as_wire_str().to_string(),
        progress_percentage: state.progress_percentage,
        progress_message: state.progress_message.clone(),
        current_step: state.current_step.clone(),
        total_steps: state.formatted_tasks.len() as u32,
        formatted_tasks: state.formatted_tasks.clone(),
        task_status_update: None,
        timestamp: 0.0,
    }
}

fn build_final_metadata(state: &WorkflowState) -> FinalMetadata {
    let get_f64 = |key: &str| state.execution_metadata.get(key).and_then(|v| v.as_f64());
    FinalMetadata {
        domains: state
            .execution_metadata
            .get("domains")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        quality_score: get_f64("quality_score").unwrap_or(0.0) as f32,
        processing_time_seconds: get_f64("processing_time_seconds").unwrap_or(0.0),
        total_documents: state
            .execution_metadata
            .get("total_documents")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
    }
}
