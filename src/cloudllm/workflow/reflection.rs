//! Reflection Node (§4.1): two sequential LLM calls that turn a raw query
//! into a refined, language-tagged intent and — unless the turn is pure
//! chitchat — a typed [`ExecutionPlan`].

use super::datetime_ctx::{inject_tenant_datetime, tool_needs_datetime_context};
use super::errors::EngineError;
use super::providers::LlmProvider;
use super::registry::AgentRegistry;
use super::state::{NextAction, ProcessingStatus, StatePatch, WorkflowState};
use super::types::{
    AgentDescriptor, ChatMessage, ExecutionPlan, ProviderDescriptor, SemanticRouting,
};
use super::config::EngineConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;

pub struct ReflectionNode {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<AgentRegistry>,
    config: EngineConfig,
}

impl ReflectionNode {
    pub fn new(provider: Arc<dyn LlmProvider>, registry: Arc<AgentRegistry>, config: EngineConfig) -> Self {
        Self {
            provider,
            registry,
            config,
        }
    }

    pub async fn run(&self, state: &WorkflowState) -> Result<StatePatch, EngineError> {
        let routing = self.call_semantic_determination(state).await;

        if routing.is_chitchat {
            return Ok(StatePatch::new()
                .with_debug("reflection: chitchat detected, skipping plan generation")
                .tap(|p| {
                    p.current_step = Some("reflection".to_string());
                    p.next_action = Some(NextAction::FinalResponse);
                    p.processing_status = Some(ProcessingStatus::ChitchatDetected);
                    p.progress_percentage = Some(20.0);
                    p.progress_message = Some("Chitchat detected".to_string());
                    p.semantic_routing = Some(routing);
                }));
        }

        let visible_agents = self
            .registry
            .get_visible_agents(
                &state.user_context.tenant_id,
                state.user_context.role,
                state.user_context.department_id.as_deref(),
            )
            .await;

        let mut plan = self.call_plan_generation(state, &routing, &visible_agents).await?;

        backfill_agent_ids(&mut plan, &visible_agents)?;
        validate_plan(&plan, &visible_agents)?;
        inject_datetime_context(&mut plan, &state.tenant_timezone, &state.tenant_current_datetime);

        let agent_providers = resolve_providers(&plan, &visible_agents)?;

        Ok(StatePatch::new()
            .with_debug(format!(
                "reflection: plan with {} step(s) generated",
                plan.steps.len()
            ))
            .tap(|p| {
                p.current_step = Some("reflection".to_string());
                p.next_action = Some(NextAction::ExecutePlanning);
                p.processing_status = Some(ProcessingStatus::PlanningReady);
                p.progress_percentage = Some(40.0);
                p.progress_message = Some("Execution plan ready".to_string());
                p.semantic_routing = Some(routing);
                p.execution_plan = Some(plan);
                p.agent_providers = Some(agent_providers);
            }))
    }

    async fn call_semantic_determination(&self, state: &WorkflowState) -> SemanticRouting {
        let prompt = semantic_determination_prompt(state, self.config.history_turns_for_semantics);
        let temperature = if state.user_context.temperature > 0.0 {
            state.user_context.temperature
        } else {
            self.config.default_temperature
        };
        let result = timeout(
            self.config.llm_call_timeout,
            self.provider.invoke(
                &prompt,
                &state.user_context.tenant_id,
                true,
                temperature,
                self.config.max_tokens,
            ),
        )
        .await;

        match result {
            Ok(Ok(r)) => parse_semantic_routing(&r.content).unwrap_or_else(|| {
                log::warn!("reflection: semantic routing parse failure, using fallback");
                SemanticRouting::fallback(&state.query)
            }),
            Ok(Err(e)) => {
                log::warn!("reflection: semantic determination LLM call failed: {e}");
                SemanticRouting::fallback(&state.query)
            }
            Err(_) => {
                log::warn!(
                    "reflection: semantic determination LLM call timed out after {:?}",
                    self.config.llm_call_timeout
                );
                SemanticRouting::fallback(&state.query)
            }
        }
    }

    async fn call_plan_generation(
        &self,
        state: &WorkflowState,
        routing: &SemanticRouting,
        visible_agents: &[AgentDescriptor],
    ) -> Result<ExecutionPlan, EngineError> {
        let prompt = plan_generation_prompt(
            state,
            routing,
            visible_agents,
            self.config.history_turns_for_planning,
        );
        let temperature = if state.user_context.temperature > 0.0 {
            state.user_context.temperature
        } else {
            self.config.default_temperature
        };
        let result = timeout(
            self.config.llm_call_timeout,
            self.provider.invoke(
                &prompt,
                &state.user_context.tenant_id,
                true,
                temperature,
                self.config.max_tokens,
            ),
        )
        .await
        .map_err(|_| {
            EngineError::Planning(format!(
                "plan generation LLM call timed out after {:?}",
                self.config.llm_call_timeout
            ))
        })?
        .map_err(|e| EngineError::Planning(format!("plan generation LLM call failed: {e}")))?;

        parse_execution_plan(&result.content)
            .ok_or_else(|| EngineError::Planning("plan generation returned unparseable JSON".to_string()))
    }
}

trait Tap: Sized {
    fn tap(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}
impl Tap for StatePatch {}

fn semantic_determination_prompt(state: &WorkflowState, history_turns: usize) -> String {
    let history = recent_turns(&state.messages, history_turns);
    format!(
        "You are a semantic routing classifier for a multi-tenant assistant.\n\
         Conversation history (most recent last):\n{history}\n\n\
         User query: {query}\n\n\
         Classify this turn. `is_chitchat` must be true ONLY when the query is pure \
         greetings/acknowledgement with no actionable request; anything requiring tools, \
         real-time data, or document lookup must be false. Restate the user's intent as a \
         self-contained `refined_query` in the detected language. Respond with a JSON object \
         matching: {{\"detected_language\": string, \"is_chitchat\": bool, \"refined_query\": \
         string, \"summary_history\": string}}.",
        history = history,
        query = state.query,
    )
}

fn plan_generation_prompt(
    state: &WorkflowState,
    routing: &SemanticRouting,
    visible_agents: &[AgentDescriptor],
    history_turns: usize,
) -> String {
    let history = recent_turns(&state.messages, history_turns);
    let agents_json = serde_json::to_string_pretty(
        &visible_agents
            .iter()
            .map(|a| {
                serde_json::json!({
                    "agent_id": a.agent_id,
                    "agent_name": a.agent_name,
                    "tools": a.tools.iter().map(|t| serde_json::json!({
                        "name": t.name,
                        "access_level": t.access_level,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or_default();

    format!(
        "You are the execution planner for a multi-tenant assistant.\n\
         Detected language: {lang}\n\
         Access scope: {scope:?}\n\
         Tenant timezone: {tz}\n\
         Tenant current datetime: {now}\n\
         Conversation history (most recent last):\n{history}\n\n\
         Conversation summary: {summary}\n\
         Refined query: {refined}\n\n\
         Available agents and tools:\n{agents_json}\n\n\
         Produce a JSON execution plan with ordered steps; tasks within a step run \
         concurrently and must each reference an agent_id and agent_name from the list above. \
         Every tool used must be declared on that agent. Respond with a JSON object matching: \
         {{\"total_steps\": int, \"current_step\": int, \"aggregate_status\": string, \
         \"steps\": [{{\"step_id\": string, \"step_number\": int, \"parallel_execution\": bool, \
         \"status\": string, \"tasks\": [{{\"agent\": string, \"agent_id\": string, \"purpose\": \
         string, \"tools\": [{{\"tool\": string, \"message\": string}}], \"queries\": [string], \
         \"status\": string, \"retry_attempts\": int, \"retry_history\": [], \"result\": null}}]}}]}}.",
        lang = routing.detected_language,
        scope = state.user_context.access_scope,
        tz = state.tenant_timezone,
        now = state.tenant_current_datetime,
        history = history,
        summary = routing.summary_history,
        refined = routing.refined_query,
        agents_json = agents_json,
    )
}

fn recent_turns(messages: &[ChatMessage], n: usize) -> String {
    messages
        .iter()
        .rev()
        .take(n)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|m| m.format_turn())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strips a markdown code fence around a JSON blob, if present, then parses.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

fn parse_semantic_routing(raw: &str) -> Option<SemanticRouting> {
    serde_json::from_str(strip_fence(raw)).ok()
}

fn parse_execution_plan(raw: &str) -> Option<ExecutionPlan> {
    serde_json::from_str(strip_fence(raw)).ok()
}

/// For any task with a missing/empty `agent_id` but a known `agent` name,
/// fill `agent_id` from the visible-agents map (case-insensitive), per §4.1.
fn backfill_agent_ids(
    plan: &mut ExecutionPlan,
    visible_agents: &[AgentDescriptor],
) -> Result<(), EngineError> {
    for step in &mut plan.steps {
        for task in &mut step.tasks {
            if task.agent_id.trim().is_empty() {
                let found = visible_agents
                    .iter()
                    .find(|a| a.agent_name.eq_ignore_ascii_case(&task.agent));
                match found {
                    Some(agent) => task.agent_id = agent.agent_id.clone(),
                    None => {
                        return Err(EngineError::Planning(format!(
                            "plan referenced unknown agent '{}' with no agent_id",
                            task.agent
                        )))
                    }
                }
            }
        }
    }
    Ok(())
}

/// Schema closure invariant (Testable Property 1): every `agent_id` must be
/// visible, and every tool must be declared on that agent.
fn validate_plan(plan: &ExecutionPlan, visible_agents: &[AgentDescriptor]) -> Result<(), EngineError> {
    for step in &plan.steps {
        for task in &step.tasks {
            let agent = visible_agents
                .iter()
                .find(|a| a.agent_id == task.agent_id)
                .ok_or_else(|| {
                    EngineError::Planning(format!(
                        "plan referenced agent_id '{}' not visible to caller",
                        task.agent_id
                    ))
                })?;
            for tool_call in &task.tools {
                if !agent.has_tool(&tool_call.tool) {
                    return Err(EngineError::Planning(format!(
                        "agent '{}' has no tool named '{}'",
                        agent.agent_name, tool_call.tool
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Rewrite any `datetime` tool's message/sub-query to carry the tenant's
/// timezone and current datetime, exactly once (§4.1, S6).
fn inject_datetime_context(plan: &mut ExecutionPlan, timezone: &str, current_datetime: &str) {
    for step in &mut plan.steps {
        for task in &mut step.tasks {
            for (idx, tool_call) in task.tools.iter_mut().enumerate() {
                if tool_needs_datetime_context(&tool_call.tool) {
                    tool_call.message = inject_tenant_datetime(&tool_call.message, timezone, current_datetime);
                    if let Some(q) = task.queries.get_mut(idx) {
                        *q = inject_tenant_datetime(q, timezone, current_datetime);
                    }
                }
            }
        }
    }
}

/// Resolve `agent_providers` for only the agent_ids the plan actually
/// references. Missing provider config for any referenced agent is a
/// planning failure (§4.1).
fn resolve_providers(
    plan: &ExecutionPlan,
    visible_agents: &[AgentDescriptor],
) -> Result<HashMap<String, ProviderDescriptor>, EngineError> {
    let mut out = HashMap::new();
    for agent_id in plan.referenced_agent_ids() {
        let agent = visible_agents
            .iter()
            .find(|a| a.agent_id == agent_id)
            .ok_or_else(|| {
                EngineError::Planning(format!("no provider configured for agent_id '{}'", agent_id))
            })?;
        out.insert(agent_id, agent.provider_ref.clone());
    }
    Ok(out)
}
