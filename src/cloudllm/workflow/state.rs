//! `WorkflowState` (§3.7): the single value threaded through the graph, plus
//! the partial-state merge rule nodes use to report back.
//!
//! Per §9 "Partial-state merging", `WorkflowState` is a record with explicit
//! append-fields (`messages`, `agent_responses`, `final_sources`,
//! `debug_trace`) and overwrite-fields. `merge` applies the right rule per
//! field so a node never has to know the full state, only what it changed.

use super::progress::TaskView;
use super::types::{
    AgentResponse, ChatMessage, ConflictResolution, ExecutionPlan, NormalizedSource,
    ProviderDescriptor, SemanticRouting, UserContext,
};
use std::collections::HashMap;

/// Where the router sends the state next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Reflection,
    ExecutePlanning,
    ConflictResolution,
    FinalResponse,
    Error,
    Terminate,
}

/// Coarse-grained status surfaced to the caller, separate from per-task
/// `TaskStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    ChitchatDetected,
    PlanningReady,
    ReadyForResolution,
}

impl ProcessingStatus {
    /// The string the §6.2/§6.3 wire schemas expect.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Running => "running",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::CompletedWithErrors => "completed_with_errors",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::ChitchatDetected => "chitchat_detected",
            ProcessingStatus::PlanningReady => "planning_ready",
            ProcessingStatus::ReadyForResolution => "ready_for_resolution",
        }
    }
}

/// The full workflow state threaded node to node.
#[derive(Clone)]
pub struct WorkflowState {
    // Input
    pub query: String,
    pub messages: Vec<ChatMessage>,
    pub user_context: UserContext,
    pub tenant_timezone: String,
    pub tenant_current_datetime: String,

    // Control
    pub current_step: String,
    pub next_action: NextAction,
    pub processing_status: ProcessingStatus,

    // Progress
    pub progress_percentage: f32,
    pub progress_message: String,
    pub should_yield: bool,

    // Planning artifacts
    pub semantic_routing: Option<SemanticRouting>,
    pub execution_plan: Option<ExecutionPlan>,
    pub formatted_tasks: Vec<TaskView>,
    pub agent_providers: HashMap<String, ProviderDescriptor>,

    // Execution artifacts
    pub agent_responses: Vec<AgentResponse>,
    pub conflict_resolution: Option<ConflictResolution>,
    pub final_response: Option<String>,
    pub final_sources: Vec<NormalizedSource>,

    // Error
    pub error_message: Option<String>,
    pub exception_type: Option<String>,
    pub retry_count: u32,

    // Diagnostics
    pub debug_trace: Vec<String>,
    pub execution_metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn initial(
        query: String,
        messages: Vec<ChatMessage>,
        user_context: UserContext,
        tenant_timezone: String,
        tenant_current_datetime: String,
    ) -> Self {
        Self {
            query,
            messages,
            user_context,
            tenant_timezone,
            tenant_current_datetime,
            current_step: "orchestrator_entry".to_string(),
            next_action: NextAction::Reflection,
            processing_status: ProcessingStatus::Pending,
            progress_percentage: 0.0,
            progress_message: String::new(),
            should_yield: false,
            semantic_routing: None,
            execution_plan: None,
            formatted_tasks: vec![],
            agent_providers: HashMap::new(),
            agent_responses: vec![],
            conflict_resolution: None,
            final_response: None,
            final_sources: vec![],
            error_message: None,
            exception_type: None,
            retry_count: 0,
            debug_trace: vec![],
            execution_metadata: HashMap::new(),
        }
    }

    /// Apply a node's partial update: overwrite fields replace, append
    /// fields extend.
    pub fn merge(&mut self, patch: StatePatch) {
        if let Some(v) = patch.current_step {
            self.current_step = v;
        }
        if let Some(v) = patch.next_action {
            self.next_action = v;
        }
        if let Some(v) = patch.processing_status {
            self.processing_status = v;
        }
        if let Some(v) = patch.progress_percentage {
            self.progress_percentage = v;
        }
        if let Some(v) = patch.progress_message {
            self.progress_message = v;
        }
        if let Some(v) = patch.should_yield {
            self.should_yield = v;
        }
        if let Some(v) = patch.semantic_routing {
            self.semantic_routing = Some(v);
        }
        if let Some(v) = patch.execution_plan {
            self.execution_plan = Some(v);
        }
        if let Some(v) = patch.formatted_tasks {
            self.formatted_tasks = v;
        }
        if let Some(v) = patch.agent_providers {
            self.agent_providers = v;
        }
        if let Some(v) = patch.conflict_resolution {
            self.conflict_resolution = Some(v);
        }
        if let Some(v) = patch.final_response {
            self.final_response = Some(v);
        }
        if let Some(v) = patch.error_message {
            self.error_message = Some(v);
        }
        if let Some(v) = patch.exception_type {
            self.exception_type = Some(v);
        }
        if let Some(v) = patch.retry_count {
            self.retry_count = v;
        }
        if let Some(v) = patch.execution_metadata {
            self.execution_metadata.extend(v);
        }

        // Append-only fields.
        self.messages.extend(patch.messages_append);
        self.agent_responses.extend(patch.agent_responses_append);
        self.final_sources.extend(patch.final_sources_append);
        self.debug_trace.extend(patch.debug_trace_append);
    }
}

/// What a node returns: only the fields it changed. `Option::None` means "no
/// opinion, leave as-is"; the four `_append` vectors are always additive.
#[derive(Default)]
pub struct StatePatch {
    pub current_step: Option<String>,
    pub next_action: Option<NextAction>,
    pub processing_status: Option<ProcessingStatus>,
    pub progress_percentage: Option<f32>,
    pub progress_message: Option<String>,
    pub should_yield: Option<bool>,
    pub semantic_routing: Option<SemanticRouting>,
    pub execution_plan: Option<ExecutionPlan>,
    pub formatted_tasks: Option<Vec<TaskView>>,
    pub agent_providers: Option<HashMap<String, ProviderDescriptor>>,
    pub conflict_resolution: Option<ConflictResolution>,
    pub final_response: Option<String>,
    pub error_message: Option<String>,
    pub exception_type: Option<String>,
    pub retry_count: Option<u32>,
    pub execution_metadata: Option<HashMap<String, serde_json::Value>>,

    pub messages_append: Vec<ChatMessage>,
    pub agent_responses_append: Vec<AgentResponse>,
    pub final_sources_append: Vec<NormalizedSource>,
    pub debug_trace_append: Vec<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, line: impl Into<String>) -> Self {
        self.debug_trace_append.push(line.into());
        self
    }
}
