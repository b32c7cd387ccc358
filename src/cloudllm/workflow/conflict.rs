//! Conflict Resolution Node (§4.3): reconciles ≥2 successful `AgentResponse`s
//! into one answer via an LLM call, with a deterministic fallback when that
//! call fails.

use super::config::EngineConfig;
use super::errors::EngineError;
use super::providers::LlmProvider;
use super::sources::merge_and_dedupe;
use super::state::{NextAction, StatePatch};
use super::types::{
    AgentResponse, ConflictLevel, ConflictResolution, EvidenceRankingEntry, NormalizedSource,
    ResolutionMethod, TaskStatus,
};
use std::sync::Arc;
use tokio::time::timeout;

const RELIABILITY_INDICATORS: [&str; 5] = [".gov", ".edu", ".org", "intra.", "wiki."];

/// Per-response evidence bag fed into the conflict-resolution prompt.
#[derive(Debug, Clone)]
pub struct EvidenceAnalysis {
    pub total_sources: usize,
    pub reliable_sources_count: usize,
    pub reliability_score: f32,
    pub recency_score: f32,
    pub completeness_score: f32,
}

/// Fraction of source identifiers matching a reliability indicator, floored
/// at 0.3 and capped at 1.0.
fn reliability_score(sources: &[NormalizedSource]) -> (usize, f32) {
    if sources.is_empty() {
        return (0, 0.3);
    }
    let reliable = sources
        .iter()
        .filter(|s| {
            let ident = s.url.as_deref().or(s.document_id.as_deref()).unwrap_or("");
            RELIABILITY_INDICATORS.iter().any(|ind| ident.contains(ind))
        })
        .count();
    let fraction = reliable as f32 / sources.len() as f32;
    (reliable, fraction.max(0.3).min(1.0))
}

pub fn evidence_analysis(response: &AgentResponse) -> EvidenceAnalysis {
    let (reliable_count, reliability) = reliability_score(&response.sources);
    EvidenceAnalysis {
        total_sources: response.sources.len(),
        reliable_sources_count: reliable_count,
        reliability_score: reliability,
        recency_score: 0.8,
        completeness_score: (response.sources.len() as f32 / 5.0).min(1.0),
    }
}

pub struct ConflictResolutionNode {
    provider: Arc<dyn LlmProvider>,
    config: EngineConfig,
}

impl ConflictResolutionNode {
    pub fn new(provider: Arc<dyn LlmProvider>, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    pub async fn run(&self, state: &super::state::WorkflowState) -> Result<StatePatch, EngineError> {
        let successes: Vec<&AgentResponse> = state
            .agent_responses
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .collect();

        if successes.len() < 2 {
            return Err(EngineError::Execution(
                "conflict resolution invoked with fewer than 2 successful responses".to_string(),
            ));
        }

        let language = state
            .semantic_routing
            .as_ref()
            .map(|r| r.detected_language.clone())
            .unwrap_or_else(|| "english".to_string());
        let query = state
            .semantic_routing
            .as_ref()
            .map(|r| r.refined_query.clone())
            .unwrap_or_else(|| state.query.clone());

        let analyses: Vec<EvidenceAnalysis> = successes.iter().map(|r| evidence_analysis(r)).collect();
        let prompt = build_prompt(&query, &language, &successes, &analyses);

        let resolution = match timeout(
            self.config.llm_call_timeout,
            self.provider.invoke(
                &prompt,
                &state.user_context.tenant_id,
                true,
                self.config.default_temperature,
                self.config.max_tokens,
            ),
        )
        .await
        {
            Ok(Ok(result)) => parse_resolution(&result.content)
                .unwrap_or_else(|| fallback_resolution(&successes, &self.config)),
            Ok(Err(e)) => {
                log::warn!("conflict resolution LLM call failed, using fallback: {e}");
                fallback_resolution(&successes, &self.config)
            }
            Err(_) => {
                log::warn!(
                    "conflict resolution LLM call timed out after {:?}, using fallback",
                    self.config.llm_call_timeout
                );
                fallback_resolution(&successes, &self.config)
            }
        };

        let extra_sources = successes.iter().flat_map(|r| r.sources.clone());
        let combined = merge_and_dedupe(resolution.combined_sources.clone(), extra_sources, &self.config);
        let resolution = ConflictResolution {
            combined_sources: combined,
            ..resolution
        };

        Ok(StatePatch::new()
            .with_debug(format!(
                "conflict_resolution: resolved {} responses via {:?}",
                successes.len(),
                resolution.resolution_method
            ))
            .tap(|p| {
                p.current_step = Some("conflict_resolver".to_string());
                p.next_action = Some(NextAction::FinalResponse);
                p.progress_percentage = Some(90.0);
                p.progress_message = Some("Conflict resolved".to_string());
                p.conflict_resolution = Some(resolution);
            }))
    }
}

trait Tap: Sized {
    fn tap(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}
impl Tap for StatePatch {}

fn build_prompt(
    refined_query: &str,
    language: &str,
    responses: &[&AgentResponse],
    analyses: &[EvidenceAnalysis],
) -> String {
    let candidates: Vec<serde_json::Value> = responses
        .iter()
        .zip(analyses.iter())
        .enumerate()
        .map(|(index, (response, analysis))| {
            serde_json::json!({
                "agent_index": index,
                "agent_name": response.agent_name,
                "content": response.content,
                "confidence": response.confidence,
                "tools_used": response.tools_used,
                "execution_time": response.execution_time_seconds,
                "sources_count": response.sources.len(),
                "evidence_analysis": {
                    "total_sources": analysis.total_sources,
                    "reliable_sources_count": analysis.reliable_sources_count,
                    "reliability_score": analysis.reliability_score,
                    "recency_score": analysis.recency_score,
                    "completeness_score": analysis.completeness_score,
                },
            })
        })
        .collect();
    let candidates_json = serde_json::to_string_pretty(&candidates).unwrap_or_default();

    format!(
        "You are reconciling {n} independent agent responses to the same query.\n\
         Refined query: {query}\n\
         Detected language: {language}\n\n\
         Candidate responses:\n{candidates_json}\n\n\
         Apply, in this order: consensus voting, recency priority, evidence quality. \
         Respond with a JSON object matching: {{\"final_answer\": string, \"winning_agents\": \
         [string], \"conflict_level\": \"low\"|\"medium\"|\"high\", \"resolution_method\": \
         \"consensus_voting\"|\"recency_priority\"|\"evidence_quality\"|\"combination\", \
         \"evidence_ranking\": [{{\"agent_name\": string, \"score\": float, \"recency\": float, \
         \"consensus\": float, \"completeness\": float, \"source_reliability\": float}}], \
         \"resolution_reasoning\": string, \"combined_sources\": [], \"confidence_score\": float}}.",
        n = responses.len(),
        query = refined_query,
        language = language,
        candidates_json = candidates_json,
    )
}

fn parse_resolution(raw: &str) -> Option<ConflictResolution> {
    let trimmed = raw.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim().strip_suffix("```").unwrap_or(s).trim())
        .unwrap_or(trimmed);
    serde_json::from_str(json_text).ok()
}

/// §4.3's fallback: highest-confidence response wins, neutral 0.5 evidence
/// factors, `combined_sources` left empty (the caller deduplicates it in
/// with every response's sources regardless).
fn fallback_resolution(responses: &[&AgentResponse], _config: &EngineConfig) -> ConflictResolution {
    let mut iter = responses.iter();
    let winner = match iter.next() {
        Some(first) => iter.fold(*first, |best, candidate| {
            if candidate.confidence > best.confidence {
                candidate
            } else {
                best
            }
        }),
        None => {
            return ConflictResolution {
                final_answer: String::new(),
                winning_agents: vec![],
                conflict_level: ConflictLevel::Other,
                resolution_method: ResolutionMethod::FallbackHighestConfidence,
                evidence_ranking: vec![],
                resolution_reasoning: "no candidate responses available".to_string(),
                combined_sources: vec![],
                confidence_score: 0.0,
            }
        }
    };

    ConflictResolution {
        final_answer: winner.content.clone(),
        winning_agents: vec![winner.agent_name.clone()],
        conflict_level: ConflictLevel::Other,
        resolution_method: ResolutionMethod::FallbackHighestConfidence,
        evidence_ranking: vec![EvidenceRankingEntry {
            agent_name: winner.agent_name.clone(),
            score: 0.5,
            recency: 0.5,
            consensus: 0.5,
            completeness: 0.5,
            source_reliability: 0.5,
        }],
        resolution_reasoning: "LLM resolution unavailable; selected the highest-confidence response.".to_string(),
        combined_sources: vec![],
        confidence_score: winner.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::providers::test_support::ScriptedProvider;
    use super::super::state::WorkflowState;
    use super::super::types::{AccessScope, RetryRecord, SemanticRouting, UserContext, UserRole};

    fn ctx() -> UserContext {
        UserContext::new("u1", "t1", UserRole::Admin, AccessScope::Both, "UTC", "en", "openai")
    }

    fn response(agent: &str, confidence: f32, sources: Vec<NormalizedSource>) -> AgentResponse {
        AgentResponse {
            agent_name: agent.to_string(),
            agent_id: format!("a-{agent}"),
            content: format!("{agent} says hello"),
            confidence,
            sources,
            tools_used: vec!["rag_tool".to_string()],
            execution_time_seconds: 1.0,
            status: TaskStatus::Completed,
            attempts: 1,
            retry_history: Vec::<RetryRecord>::new(),
            error: None,
        }
    }

    fn state_with(responses: Vec<AgentResponse>) -> WorkflowState {
        let mut s = WorkflowState::initial("q".into(), vec![], ctx(), "UTC".into(), "now".into());
        s.agent_responses = responses;
        s.semantic_routing = Some(SemanticRouting {
            detected_language: "english".into(),
            is_chitchat: false,
            refined_query: "q".into(),
            summary_history: String::new(),
        });
        s
    }

    #[test]
    fn reliability_score_detects_gov_and_edu_sources() {
        let sources = vec![
            NormalizedSource { url: Some("https://example.gov/doc".into()), ..Default::default() },
            NormalizedSource { url: Some("https://random.biz".into()), ..Default::default() },
        ];
        let (count, score) = reliability_score(&sources);
        assert_eq!(count, 1);
        assert_eq!(score, 0.5);
    }

    #[test]
    fn reliability_score_floors_at_0_3_when_no_matches() {
        let sources = vec![NormalizedSource { url: Some("https://random.biz".into()), ..Default::default() }];
        let (count, score) = reliability_score(&sources);
        assert_eq!(count, 0);
        assert_eq!(score, 0.3);
    }

    #[tokio::test]
    async fn resolves_via_llm_when_json_parses() {
        let provider = Arc::new(ScriptedProvider::ok(vec![
            r#"{"final_answer":"combined answer","winning_agents":["hr"],"conflict_level":"low","resolution_method":"consensus_voting","evidence_ranking":[],"resolution_reasoning":"agreed","combined_sources":[],"confidence_score":0.9}"#,
        ]));
        let node = ConflictResolutionNode::new(provider, EngineConfig::default());
        let responses = vec![response("hr", 0.8, vec![]), response("finance", 0.6, vec![])];
        let patch = node.run(&state_with(responses)).await.unwrap();
        let resolution = patch.conflict_resolution.unwrap();
        assert_eq!(resolution.final_answer, "combined answer");
        assert_eq!(resolution.resolution_method, ResolutionMethod::ConsensusVoting);
        assert_eq!(patch.next_action, Some(NextAction::FinalResponse));
    }

    #[tokio::test]
    async fn falls_back_to_highest_confidence_on_llm_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err("provider down".into())]));
        let node = ConflictResolutionNode::new(provider, EngineConfig::default());
        let responses = vec![response("hr", 0.3, vec![]), response("finance", 0.95, vec![])];
        let patch = node.run(&state_with(responses)).await.unwrap();
        let resolution = patch.conflict_resolution.unwrap();
        assert_eq!(resolution.winning_agents, vec!["finance".to_string()]);
        assert_eq!(resolution.resolution_method, ResolutionMethod::FallbackHighestConfidence);
    }

    #[tokio::test]
    async fn combined_sources_merge_all_response_sources_deduped() {
        let provider = Arc::new(ScriptedProvider::ok(vec![
            r#"{"final_answer":"x","winning_agents":["hr"],"conflict_level":"low","resolution_method":"consensus_voting","evidence_ranking":[],"resolution_reasoning":"r","combined_sources":[],"confidence_score":0.8}"#,
        ]));
        let node = ConflictResolutionNode::new(provider, EngineConfig::default());
        let shared = NormalizedSource { url: Some("https://shared.org".into()), ..Default::default() };
        let responses = vec![
            response("hr", 0.8, vec![shared.clone()]),
            response("finance", 0.7, vec![shared]),
        ];
        let patch = node.run(&state_with(responses)).await.unwrap();
        let resolution = patch.conflict_resolution.unwrap();
        assert_eq!(resolution.combined_sources.len(), 1);
    }

    #[tokio::test]
    async fn fewer_than_two_successes_is_rejected() {
        let provider = Arc::new(ScriptedProvider::ok(vec![]));
        let node = ConflictResolutionNode::new(provider, EngineConfig::default());
        let err = node.run(&state_with(vec![response("hr", 0.8, vec![])])).await.unwrap_err();
        assert_eq!(err.exception_type(), "ExecutionError");
    }
}
