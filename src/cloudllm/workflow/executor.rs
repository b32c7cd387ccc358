//! Executor Node (§4.2): runs an [`ExecutionPlan`]'s steps strictly
//! sequentially, each step's tasks concurrently, and each task's tools
//! strictly sequentially with per-task retry and backoff.

use super::config::EngineConfig;
use super::errors::{EngineError, EngineResult};
use super::locale;
use super::progress::{ProgressBus, ProgressEvent, TaskColor, TaskStatusUpdate, TaskView};
use super::state::{NextAction, StatePatch};
use super::types::{
    AgentResponse, ProviderDescriptor, RetryRecord, Step, Task, TaskStatus, UserContext,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};

/// One tool invocation's fully-enriched input, per §4.2's tool invocation
/// contract.
#[derive(Debug, Clone)]
pub struct ToolInvocationRequest {
    pub agent_name: String,
    pub agent_id: String,
    pub tool_name: String,
    pub query: String,
    pub user_context: UserContext,
    pub detected_language: String,
    pub provider: ProviderDescriptor,
}

/// A tool's output, already coerced to this shape by the concrete
/// implementation (malformed-JSON / non-string coercion is the
/// collaborator's responsibility, not the engine's).
#[derive(Debug, Clone, Default)]
pub struct ToolInvocationOutcome {
    pub content: String,
    pub confidence: f32,
    pub sources: Vec<super::types::NormalizedSource>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Capability set `{invoke_tool}`: the seam per-tool calls go through. The
/// real tool dispatcher (routing a named tool to its document-search /
/// calculator / whatever backend) is an out-of-scope external collaborator
/// (§6.5); this trait is its boundary.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn invoke_tool(&self, request: ToolInvocationRequest) -> EngineResult<ToolInvocationOutcome>;
}

pub struct ExecutorNode {
    executor: Arc<dyn AgentExecutor>,
    progress: ProgressBus,
    config: EngineConfig,
    cancelled: watch::Receiver<bool>,
}

impl ExecutorNode {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        progress: ProgressBus,
        config: EngineConfig,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            executor,
            progress,
            config,
            cancelled,
        }
    }

    pub async fn run(&self, state: &super::state::WorkflowState) -> Result<StatePatch, EngineError> {
        let plan = state
            .execution_plan
            .clone()
            .ok_or_else(|| EngineError::Execution("executor invoked with no execution plan".to_string()))?;

        let language = state
            .semantic_routing
            .as_ref()
            .map(|r| r.detected_language.clone())
            .unwrap_or_else(|| "english".to_string());

        let tasks = Arc::new(Mutex::new(initial_task_views(&plan)));

        self.emit_plan_ready(&tasks, &language).await;
        self.emit_executing_agents(&tasks, &language).await;

        let mut all_responses: Vec<AgentResponse> = Vec::new();

        for step in &plan.steps {
            if *self.cancelled.borrow() {
                return Err(EngineError::Cancelled);
            }

            let step_results = self.run_step(step, &plan, state, &tasks, &language).await?;
            all_responses.extend(step_results);
        }

        let successes: Vec<&AgentResponse> = all_responses
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .collect();
        let distinct_agents: HashSet<&str> = successes.iter().map(|r| r.agent_id.as_str()).collect();

        let final_tasks = tasks.lock().await.clone();
        let final_progress = progress_percentage(&final_tasks);

        let mut patch = StatePatch::new()
            .with_debug(format!(
                "executor: {} task(s) settled, {} distinct successful agent(s)",
                all_responses.len(),
                distinct_agents.len()
            ));
        patch.current_step = Some("executor".to_string());
        patch.formatted_tasks = Some(final_tasks.clone());
        patch.progress_percentage = Some(final_progress);
        patch.agent_responses_append = all_responses;

        if distinct_agents.is_empty() {
            patch.next_action = Some(NextAction::Error);
            patch.error_message = Some("All agents failed to execute".to_string());
            patch.exception_type = Some("AllTasksFailed".to_string());
            patch.progress_message = Some(locale::incomplete_footer(&language));
        } else if distinct_agents.len() == 1 {
            patch.next_action = Some(NextAction::FinalResponse);
            patch.progress_message = Some("completed".to_string());
            patch.execution_metadata = Some(routing_decision_metadata("single_agent_sequential"));
            self.emit_settled(&final_tasks, &language, "completed").await;
        } else {
            patch.next_action = Some(NextAction::ConflictResolution);
            patch.progress_message = Some("conflict_resolution_needed".to_string());
            patch.execution_metadata = Some(routing_decision_metadata("multiple_agents"));
            self.emit_settled(&final_tasks, &language, "conflict_resolution_needed")
                .await;
        }

        Ok(patch)
    }

    async fn run_step(
        &self,
        step: &Step,
        plan: &super::types::ExecutionPlan,
        state: &super::state::WorkflowState,
        tasks: &Arc<Mutex<Vec<TaskView>>>,
        language: &str,
    ) -> Result<Vec<AgentResponse>, EngineError> {
        let base_index = global_task_index(plan, step.step_number, 0);
        let futures = step.tasks.iter().enumerate().map(|(local_idx, task)| {
            let index = base_index + local_idx;
            let provider = state
                .agent_providers
                .get(&task.agent_id)
                .cloned()
                .unwrap_or_else(|| ProviderDescriptor {
                    provider_name: String::new(),
                    api_keys: vec![],
                    model_name: String::new(),
                    model_config: HashMap::new(),
                });
            self.run_task(
                index,
                task,
                provider,
                state.user_context.clone(),
                language.to_string(),
                tasks,
            )
        });
        Ok(join_all(futures).await)
    }

    async fn run_task(
        &self,
        index: usize,
        task: &Task,
        provider: ProviderDescriptor,
        user_context: UserContext,
        language: String,
        tasks: &Arc<Mutex<Vec<TaskView>>>,
    ) -> AgentResponse {
        self.mark_task_started(tasks, index).await;
        self.emit_snapshot(tasks, &language, "task_started", Some(task_update(index, "in_progress", TaskColor::Primary, None, None)))
            .await;

        let mut last_error: Option<String> = None;
        let mut retry_history: Vec<RetryRecord> = Vec::new();
        let start = std::time::Instant::now();

        for attempt in 1..=self.config.max_retry {
            if *self.cancelled.borrow() {
                return failed_response(task, index, "cancelled", retry_history, attempt, start);
            }

            match self.run_tools_once(task, &provider, &user_context, &language, last_error.as_deref()).await {
                Ok(outcome) => {
                    let enhanced_success = attempt > 1;
                    let response = AgentResponse {
                        agent_name: task.agent.clone(),
                        agent_id: task.agent_id.clone(),
                        content: outcome.content,
                        confidence: outcome.confidence,
                        sources: outcome.sources,
                        tools_used: task.tools.iter().map(|t| t.tool.clone()).collect(),
                        execution_time_seconds: start.elapsed().as_secs_f64(),
                        status: TaskStatus::Completed,
                        attempts: attempt,
                        retry_history: retry_history.clone(),
                        error: None,
                    };
                    self.mark_task_settled(tasks, index, &response).await;
                    let message = if enhanced_success {
                        format!("completed{}", locale::recovered_suffix(&language))
                    } else {
                        "completed".to_string()
                    };
                    self.emit_snapshot(
                        tasks,
                        &language,
                        "task_completed",
                        Some(task_update(index, "completed", TaskColor::Success, Some(attempt), Some(enhanced_success))),
                    )
                    .await;
                    log::debug!("executor: task {index} ({}): {message}", task.agent);
                    return response;
                }
                Err(e) => {
                    let message = e.to_string();
                    retry_history.push(RetryRecord {
                        attempt,
                        error: message.clone(),
                    });
                    last_error = Some(message.clone());

                    if attempt < self.config.max_retry {
                        self.emit_snapshot(
                            tasks,
                            &language,
                            "task_retry",
                            Some(task_update(index, "retrying", TaskColor::Danger, Some(attempt + 1), None)),
                        )
                        .await;
                        if self.sleep_or_cancel(self.config.backoff_for_attempt(attempt)).await.is_err() {
                            return failed_response(task, index, "cancelled", retry_history, attempt, start);
                        }
                    } else {
                        let response = failed_response(task, index, &message, retry_history.clone(), attempt, start);
                        self.mark_task_settled(tasks, index, &response).await;
                        self.emit_snapshot(
                            tasks,
                            &language,
                            "task_failed",
                            Some(task_update(index, "failed", TaskColor::Danger, Some(attempt), None)),
                        )
                        .await;
                        return response;
                    }
                }
            }
        }

        failed_response(task, index, "max_retry misconfigured to 0", Vec::new(), 0, start)
    }

    async fn run_tools_once(
        &self,
        task: &Task,
        provider: &ProviderDescriptor,
        user_context: &UserContext,
        language: &str,
        retry_error: Option<&str>,
    ) -> EngineResult<ToolInvocationOutcome> {
        let mut previous_content: Option<String> = None;
        let mut last_outcome = ToolInvocationOutcome::default();

        for (i, tool_call) in task.tools.iter().enumerate() {
            let query = enrich_query(task, i, previous_content.as_deref(), if i == 0 { retry_error } else { None });
            let request = ToolInvocationRequest {
                agent_name: task.agent.clone(),
                agent_id: task.agent_id.clone(),
                tool_name: tool_call.tool.clone(),
                query,
                user_context: user_context.clone(),
                detected_language: language.to_string(),
                provider: provider.clone(),
            };
            let outcome = self.invoke_with_cancellation(request).await?;
            previous_content = Some(outcome.content.clone());
            last_outcome = outcome;
        }

        if task.tools.is_empty() {
            return Ok(ToolInvocationOutcome {
                content: task.purpose.clone(),
                confidence: 0.5,
                sources: vec![],
                metadata: HashMap::new(),
            });
        }

        Ok(last_outcome)
    }

    async fn invoke_with_cancellation(
        &self,
        request: ToolInvocationRequest,
    ) -> EngineResult<ToolInvocationOutcome> {
        let mut cancelled = self.cancelled.clone();
        let tool_name = request.tool_name.clone();
        let call_timeout = self.config.llm_call_timeout;
        tokio::select! {
            result = timeout(call_timeout, self.executor.invoke_tool(request)) => match result {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Execution(format!(
                    "tool '{tool_name}' timed out after {call_timeout:?}"
                ))
                .into()),
            },
            _ = wait_for_cancellation(&mut cancelled) => Err(EngineError::Cancelled.into()),
        }
    }

    async fn sleep_or_cancel(&self, delay: std::time::Duration) -> Result<(), ()> {
        let mut cancelled = self.cancelled.clone();
        tokio::select! {
            _ = sleep(delay) => Ok(()),
            _ = wait_for_cancellation(&mut cancelled) => Err(()),
        }
    }

    async fn mark_task_started(&self, tasks: &Arc<Mutex<Vec<TaskView>>>, index: usize) {
        let mut guard = tasks.lock().await;
        if let Some(t) = guard.get_mut(index) {
            t.status = "in_progress".to_string();
            t.color = TaskColor::Primary;
        }
    }

    async fn mark_task_settled(&self, tasks: &Arc<Mutex<Vec<TaskView>>>, index: usize, response: &AgentResponse) {
        let mut guard = tasks.lock().await;
        if let Some(t) = guard.get_mut(index) {
            t.status = match response.status {
                TaskStatus::Completed => "completed".to_string(),
                TaskStatus::Failed => "failed".to_string(),
                _ => "unknown".to_string(),
            };
            t.color = match response.status {
                TaskStatus::Completed => TaskColor::Success,
                _ => TaskColor::Danger,
            };
            t.retry_attempts = response.attempts;
            t.retry_history = response.retry_history.clone();
            t.error = response.error.clone();
            t.last_error = response.retry_history.last().map(|r| r.error.clone());
            t.result = Some(response.clone());
        }
    }

    async fn emit_plan_ready(&self, tasks: &Arc<Mutex<Vec<TaskView>>>, language: &str) {
        let snapshot = tasks.lock().await.clone();
        self.progress
            .emit(ProgressEvent {
                node: "executor".to_string(),
                processing_status: "plan_ready".to_string(),
                progress_percentage: 50.0,
                progress_message: locale::plan_ready(language),
                current_step: "executor".to_string(),
                total_steps: snapshot.len() as u32,
                formatted_tasks: snapshot,
                task_status_update: None,
                timestamp: 0.0,
            })
            .await;
    }

    async fn emit_executing_agents(&self, tasks: &Arc<Mutex<Vec<TaskView>>>, language: &str) {
        let snapshot = tasks.lock().await.clone();
        let progress = progress_percentage(&snapshot);
        self.progress
            .emit(ProgressEvent {
                node: "executor".to_string(),
                processing_status: "executing_agents".to_string(),
                progress_percentage: progress,
                progress_message: locale::executing_agents(language),
                current_step: "executor".to_string(),
                total_steps: snapshot.len() as u32,
                formatted_tasks: snapshot,
                task_status_update: None,
                timestamp: 0.0,
            })
            .await;
    }

    async fn emit_snapshot(
        &self,
        tasks: &Arc<Mutex<Vec<TaskView>>>,
        language: &str,
        status: &str,
        update: Option<TaskStatusUpdate>,
    ) {
        let snapshot = tasks.lock().await.clone();
        let progress = progress_percentage(&snapshot);
        self.progress
            .emit(ProgressEvent {
                node: "executor".to_string(),
                processing_status: status.to_string(),
                progress_percentage: progress,
                progress_message: locale::executing_agents(language),
                current_step: "executor".to_string(),
                total_steps: snapshot.len() as u32,
                formatted_tasks: snapshot,
                task_status_update: update,
                timestamp: 0.0,
            })
            .await;
    }

    async fn emit_settled(&self, tasks: &[TaskView], language: &str, status: &str) {
        let progress = progress_percentage(tasks);
        self.progress
            .emit(ProgressEvent {
                node: "executor".to_string(),
                processing_status: status.to_string(),
                progress_percentage: progress,
                progress_message: locale::executing_agents(language),
                current_step: "executor".to_string(),
                total_steps: tasks.len() as u32,
                formatted_tasks: tasks.to_vec(),
                task_status_update: None,
                timestamp: 0.0,
            })
            .await;
    }
}

async fn wait_for_cancellation(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

fn task_update(
    index: usize,
    status: &str,
    color: TaskColor,
    attempt: Option<u32>,
    enhanced_success: Option<bool>,
) -> TaskStatusUpdate {
    TaskStatusUpdate {
        update_type: status.to_string(),
        task_index: Some(index),
        status: Some(status.to_string()),
        color: Some(color),
        attempt,
        enhanced_success,
    }
}

fn failed_response(
    task: &Task,
    _index: usize,
    error: &str,
    retry_history: Vec<RetryRecord>,
    attempts: u32,
    start: std::time::Instant,
) -> AgentResponse {
    AgentResponse {
        agent_name: task.agent.clone(),
        agent_id: task.agent_id.clone(),
        content: String::new(),
        confidence: 0.0,
        sources: vec![],
        tools_used: task.tools.iter().map(|t| t.tool.clone()).collect(),
        execution_time_seconds: start.elapsed().as_secs_f64(),
        status: TaskStatus::Failed,
        attempts,
        retry_history,
        error: Some(error.to_string()),
    }
}

/// Appends the "CONTEXT FROM PREVIOUS TOOLS" block (tool `i+1`) and/or the
/// "PREVIOUS ATTEMPT ERROR DETAILS" block (tool `0` on retry) to the query.
fn enrich_query(task: &Task, index: usize, previous_content: Option<&str>, retry_error: Option<&str>) -> String {
    let mut query = task.query_for(index);
    if let Some(err) = retry_error {
        query = format!(
            "{query}\n\n---\nPREVIOUS ATTEMPT ERROR DETAILS\n{err}\nAdjust your approach to avoid repeating this error.\n---"
        );
    }
    if let Some(prev) = previous_content {
        query = format!(
            "{query}\n\n---\nCONTEXT FROM PREVIOUS TOOLS\n{prev}\nBuild on these findings; do not repeat them.\n---"
        );
    }
    query
}

fn initial_task_views(plan: &super::types::ExecutionPlan) -> Vec<TaskView> {
    let mut out = Vec::new();
    for step in &plan.steps {
        for task in &step.tasks {
            let messages: HashMap<String, String> = task
                .tools
                .iter()
                .enumerate()
                .map(|(i, t)| ((i + 1).to_string(), t.message.clone()))
                .collect();
            out.push(TaskView {
                task_name: task.agent.clone(),
                purpose: task.purpose.clone(),
                agent: task.agent.clone(),
                task_index: out.len(),
                messages,
                status: "pending".to_string(),
                severity: "info".to_string(),
                color: TaskColor::Primary,
                retry_count: 0,
                max_retries: 0,
                retry_attempts: 0,
                retry_history: vec![],
                result: None,
                error: None,
                last_error: None,
            });
        }
    }
    out
}

fn global_task_index(plan: &super::types::ExecutionPlan, step_number: u32, local_index: usize) -> usize {
    let mut base = 0;
    for step in &plan.steps {
        if step.step_number == step_number {
            return base + local_index;
        }
        base += step.tasks.len();
    }
    base
}

fn routing_decision_metadata(decision: &str) -> HashMap<String, serde_json::Value> {
    let mut m = HashMap::new();
    m.insert(
        "routing_decision".to_string(),
        serde_json::Value::String(decision.to_string()),
    );
    m
}

/// `Σ tasks (100 if completed else 50 if in_progress/retrying else 0) /
/// (N_tasks × 100) × 100`, clamped to [0,100].
fn progress_percentage(tasks: &[TaskView]) -> f32 {
    if tasks.is_empty() {
        return 0.0;
    }
    let total: f32 = tasks
        .iter()
        .map(|t| match t.status.as_str() {
            "completed" => 100.0,
            "in_progress" | "retrying" => 50.0,
            _ => 0.0,
        })
        .sum();
    (total / (tasks.len() as f32 * 100.0) * 100.0).clamp(0.0, 100.0)
}
