//! Core data model for the workflow engine: user/tenant context, agent
//! descriptors, the semantic-routing and execution-plan schemas produced by
//! the reflection node, and the responses/resolutions produced downstream.
//!
//! Every wire/schema type here derives `Serialize`/`Deserialize` so it can be
//! round-tripped through an LLM's JSON-mode output and re-validated on the
//! engine side (see [`crate::cloudllm::workflow::errors`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a tenant user, used to compute [`AgentDescriptor`] visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Maintainer,
    Admin,
    DeptAdmin,
    DeptManager,
    User,
}

/// Visibility mask applied when selecting tools and documents for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    Public,
    Private,
    Both,
}

/// Per-request, immutable context describing who is asking and how the
/// planner should behave. Created at request ingress; never mutated for the
/// lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub tenant_id: String,
    pub department_id: Option<String>,
    pub role: UserRole,
    pub access_scope: AccessScope,
    pub timezone: String,
    pub locale: String,
    /// Name of the LLM provider used for planning/reflection/conflict-resolution calls.
    pub provider_name: String,
    pub temperature: f32,
}

impl UserContext {
    /// Construct a context, forcing `access_scope` to `public` for `USER` role
    /// per the §3.1 visibility contract regardless of what the caller passed in.
    pub fn new(
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        role: UserRole,
        access_scope: AccessScope,
        timezone: impl Into<String>,
        locale: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        let access_scope = if matches!(role, UserRole::User) {
            AccessScope::Public
        } else {
            access_scope
        };
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            department_id: None,
            role,
            access_scope,
            timezone: timezone.into(),
            locale: locale.into(),
            provider_name: provider_name.into(),
            temperature: 0.1,
        }
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// One tool declared on an [`AgentDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// `None` is treated the same as `Some(Both)` when USER-role filtering applies.
    pub access_level: Option<AccessScope>,
    pub category: String,
}

/// Resolved provider + model binding for one agent, filled in lazily by the
/// Agent Registry only for agent_ids a plan actually references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub provider_name: String,
    pub api_keys: Vec<String>,
    pub model_name: String,
    #[serde(default)]
    pub model_config: HashMap<String, serde_json::Value>,
}

/// A callable agent: one LLM provider + model + a tool list, addressable by
/// `agent_id` within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub agent_name: String,
    pub description: String,
    pub department_name: String,
    pub tools: Vec<ToolDescriptor>,
    pub provider_ref: ProviderDescriptor,
}

impl AgentDescriptor {
    /// True if `tool_name` is declared on this agent (case-sensitive, matching
    /// plan validation elsewhere).
    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool_name)
    }
}

/// Output of reflection LLM call #1: chitchat classification + query refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRouting {
    /// Lowercase language name, e.g. `"english"`, `"vietnamese"`.
    pub detected_language: String,
    pub is_chitchat: bool,
    pub refined_query: String,
    pub summary_history: String,
}

impl SemanticRouting {
    /// The fallback contract from §4.1: used whenever LLM call #1 returns
    /// something that fails to parse.
    pub fn fallback(query: &str) -> Self {
        Self {
            detected_language: "english".to_string(),
            is_chitchat: false,
            refined_query: query.to_string(),
            summary_history: String::new(),
        }
    }
}

/// Status shared by [`Step`], [`Task`], and the plan's aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
    /// Only valid as `ExecutionPlan::aggregate_status`: some but not all steps
    /// produced at least one successful task (see Open Question decision in DESIGN.md).
    Partial,
}

/// One invocation of a named tool within a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    /// Prompt/instructions handed to the tool; may be rewritten in place by
    /// datetime-context injection or retry-error augmentation.
    pub message: String,
}

/// One record in a task's retry history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    pub attempt: u32,
    pub error: String,
}

/// Output of one task: the merged result of running its tool chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_name: String,
    pub agent_id: String,
    pub content: String,
    pub confidence: f32,
    pub sources: Vec<NormalizedSource>,
    pub tools_used: Vec<String>,
    pub execution_time_seconds: f64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub retry_history: Vec<RetryRecord>,
    pub error: Option<String>,
}

/// One task in a [`Step`]: one agent running a sequence of tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub agent: String,
    pub agent_id: String,
    pub purpose: String,
    pub tools: Vec<ToolCall>,
    /// Optional per-tool sub-queries, index-aligned with `tools`.
    #[serde(default)]
    pub queries: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub retry_history: Vec<RetryRecord>,
    pub result: Option<AgentResponse>,
}

impl Task {
    /// The sub-query or prompt to use for `tools[index]`: `queries[index]` if
    /// present and non-empty, else the tool's own `message`, else the task's
    /// purpose (used by tool index 0 per §4.2).
    pub fn query_for(&self, index: usize) -> String {
        if let Some(q) = self.queries.get(index) {
            if !q.trim().is_empty() {
                return q.clone();
            }
        }
        self.tools
            .get(index)
            .map(|t| t.message.clone())
            .unwrap_or_else(|| self.purpose.clone())
    }
}

/// One step of the plan; its tasks run concurrently, settling before the next
/// step begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub step_number: u32,
    pub parallel_execution: bool,
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

impl Step {
    pub fn new(step_number: u32, tasks: Vec<Task>) -> Self {
        Self {
            step_id: format!("step_{}", step_number),
            step_number,
            parallel_execution: tasks.len() > 1,
            status: TaskStatus::Pending,
            tasks,
        }
    }
}

/// Output of reflection LLM call #2: the typed, ordered execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub total_steps: u32,
    #[serde(default)]
    pub current_step: u32,
    pub aggregate_status: TaskStatus,
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Every `(agent, agent_id)` pair referenced anywhere in the plan, in
    /// first-seen order.
    pub fn referenced_agent_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for step in &self.steps {
            for task in &step.tasks {
                if seen.insert(task.agent_id.clone()) {
                    out.push(task.agent_id.clone());
                }
            }
        }
        out
    }
}

/// Normalized source citation, deduplicated by the first non-null of
/// `url`, `document_id`, `title`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedSource {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub access_level: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl NormalizedSource {
    /// The dedup key per §6.4: first non-null of `url | document_id | title`.
    /// Sources with none of the three never collide (each gets a unique key).
    pub fn dedup_key(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.document_id.as_deref())
            .or(self.title.as_deref())
    }
}

/// How severe the disagreement between agent responses was judged to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictLevel {
    Low,
    Medium,
    High,
    /// Preserves an LLM-supplied value outside the closed set rather than
    /// failing validation (Open Question decision, see DESIGN.md).
    #[serde(other)]
    Other,
}

/// Strategy the conflict resolver reports having applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    ConsensusVoting,
    RecencyPriority,
    EvidenceQuality,
    Combination,
    FallbackHighestConfidence,
    #[serde(other)]
    Other,
}

/// Per-agent scoring breakdown backing a [`ConflictResolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRankingEntry {
    pub agent_name: String,
    pub score: f32,
    pub recency: f32,
    pub consensus: f32,
    pub completeness: f32,
    pub source_reliability: f32,
}

/// Output of the conflict-resolution LLM call, produced when ≥2 tasks
/// completed across distinct agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub final_answer: String,
    pub winning_agents: Vec<String>,
    pub conflict_level: ConflictLevel,
    pub resolution_method: ResolutionMethod,
    pub evidence_ranking: Vec<EvidenceRankingEntry>,
    pub resolution_reasoning: String,
    pub combined_sources: Vec<NormalizedSource>,
    pub confidence_score: f32,
}

/// Wire shape of `RunRequest.messages`; converted on ingress into the base
/// crate's `Message`/`Role` shape so the rest of the engine reuses one
/// message type end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Render as `"User: ..."` / `"Assistant: ..."`, the format reflection
    /// prompts embed history turns in (system messages are rendered too, in
    /// case the caller replays them, but the reflection node only takes the
    /// last N turns regardless of role).
    pub fn format_turn(&self) -> String {
        let label = match self.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
            ChatRole::System => "System",
        };
        format!("{}: {}", label, self.content)
    }
}

/// Input to one engine run (one call per user turn).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
    pub messages: Vec<ChatMessage>,
    pub user_context: UserContext,
    pub tenant_timezone: String,
    pub tenant_current_datetime: Option<String>,
}
