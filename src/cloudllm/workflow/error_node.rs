//! Error Node (§4.5): turns any partial/total failure into one user-facing
//! message. Never surfaces stack traces, provider names, or exception class
//! names — those are logged, not returned.

use super::config::EngineConfig;
use super::locale;
use super::providers::LlmProvider;
use super::sources::merge_and_dedupe;
use super::state::{NextAction, ProcessingStatus, StatePatch, WorkflowState};
use super::types::{AgentResponse, TaskStatus};
use std::sync::Arc;

pub struct ErrorNode {
    provider: Arc<dyn LlmProvider>,
    config: EngineConfig,
}

impl ErrorNode {
    pub fn new(provider: Arc<dyn LlmProvider>, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    pub async fn run(&self, state: &WorkflowState) -> StatePatch {
        let language = state
            .semantic_routing
            .as_ref()
            .map(|r| r.detected_language.clone())
            .unwrap_or_else(|| "english".to_string());

        if let Some(exception_type) = &state.exception_type {
            log::error!(
                "workflow error_handler: exception_type={exception_type} message={:?}",
                state.error_message
            );
        }

        let successes: Vec<&AgentResponse> = state
            .agent_responses
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .collect();

        let (response_text, processing_status) = if successes.is_empty() {
            (locale::total_failure_message(&language), ProcessingStatus::Failed)
        } else {
            (
                self.partial_results_text(state, &successes, &language).await,
                ProcessingStatus::CompletedWithErrors,
            )
        };

        let sources = merge_and_dedupe(
            vec![],
            successes.iter().flat_map(|r| r.sources.clone()),
            &self.config,
        );

        StatePatch::new()
            .with_debug(format!(
                "error_handler: {} successful response(s) out of {} total",
                successes.len(),
                state.agent_responses.len()
            ))
            .tap(|p| {
                p.current_step = Some("error_handler".to_string());
                p.next_action = Some(NextAction::Terminate);
                p.processing_status = Some(processing_status);
                p.progress_percentage = Some(100.0);
                p.final_response = Some(response_text);
                p.final_sources_append = sources;
            })
    }

    async fn partial_results_text(
        &self,
        state: &WorkflowState,
        successes: &[&AgentResponse],
        language: &str,
    ) -> String {
        let prompt = partial_results_prompt(state, successes, language);
        match self
            .provider
            .invoke(&prompt, &state.user_context.tenant_id, false, self.config.default_temperature, self.config.max_tokens)
            .await
        {
            Ok(result) => result.content,
            Err(e) => {
                log::warn!("error_handler: partial-results LLM call failed, concatenating raw content: {e}");
                let concatenated = successes
                    .iter()
                    .map(|r| r.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                format!("{concatenated}\n\n{}", locale::incomplete_footer(language))
            }
        }
    }
}

trait Tap: Sized {
    fn tap(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}
impl Tap for StatePatch {}

fn partial_results_prompt(state: &WorkflowState, successes: &[&AgentResponse], language: &str) -> String {
    let contents = successes
        .iter()
        .map(|r| format!("- ({}) {}", r.agent_name, r.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Some agents failed to respond to this query, but the following partial results are \
         available. Acknowledge that the answer may be incomplete and produce one coherent \
         combined answer in {language}.\n\nQuery: {query}\n\nPartial results:\n{contents}",
        language = language,
        query = state.query,
        contents = contents,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::providers::test_support::ScriptedProvider;
    use super::super::types::{AccessScope, RetryRecord, UserContext, UserRole};

    fn ctx() -> UserContext {
        UserContext::new("u1", "t1", UserRole::Admin, AccessScope::Both, "UTC", "en", "openai")
    }

    fn response(agent: &str, status: TaskStatus) -> AgentResponse {
        AgentResponse {
            agent_name: agent.to_string(),
            agent_id: format!("a-{agent}"),
            content: format!("{agent} partial answer"),
            confidence: 0.6,
            sources: vec![],
            tools_used: vec![],
            execution_time_seconds: 1.0,
            status,
            attempts: 3,
            retry_history: vec![RetryRecord { attempt: 1, error: "timeout".into() }],
            error: if status == TaskStatus::Failed { Some("timeout".into()) } else { None },
        }
    }

    fn state_with(responses: Vec<AgentResponse>) -> WorkflowState {
        let mut s = WorkflowState::initial("q".into(), vec![], ctx(), "UTC".into(), "now".into());
        s.agent_responses = responses;
        s.exception_type = Some("AllTasksFailed".to_string());
        s.error_message = Some("All agents failed to execute".to_string());
        s
    }

    #[tokio::test]
    async fn zero_successes_emits_fixed_localized_message_without_llm_call() {
        let provider = Arc::new(ScriptedProvider::ok(vec![]));
        let node = ErrorNode::new(provider.clone(), EngineConfig::default());
        let state = state_with(vec![response("hr", TaskStatus::Failed)]);
        let patch = node.run(&state).await;
        assert_eq!(patch.final_response, Some(locale::total_failure_message("english")));
        assert_eq!(patch.processing_status, Some(ProcessingStatus::Failed));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn at_least_one_success_calls_llm_for_a_coherent_partial_answer() {
        let provider = Arc::new(ScriptedProvider::ok(vec!["here is what we found so far"]));
        let node = ErrorNode::new(provider, EngineConfig::default());
        let state = state_with(vec![response("hr", TaskStatus::Completed), response("finance", TaskStatus::Failed)]);
        let patch = node.run(&state).await;
        assert_eq!(patch.final_response, Some("here is what we found so far".to_string()));
        assert_eq!(patch.processing_status, Some(ProcessingStatus::CompletedWithErrors));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_raw_concatenation_with_footer() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err("down".into())]));
        let node = ErrorNode::new(provider, EngineConfig::default());
        let state = state_with(vec![response("hr", TaskStatus::Completed)]);
        let patch = node.run(&state).await;
        let text = patch.final_response.unwrap();
        assert!(text.contains("hr partial answer"));
        assert!(text.contains(&locale::incomplete_footer("english")));
    }

    #[tokio::test]
    async fn error_message_never_leaks_into_user_facing_text() {
        let provider = Arc::new(ScriptedProvider::ok(vec![]));
        let node = ErrorNode::new(provider, EngineConfig::default());
        let state = state_with(vec![response("hr", TaskStatus::Failed)]);
        let patch = node.run(&state).await;
        let text = patch.final_response.unwrap();
        assert!(!text.contains("AllTasksFailed"));
        assert!(!text.to_lowercase().contains("panic"));
    }
}
