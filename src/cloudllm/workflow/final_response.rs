//! Final Response Node (§4.4): produces the single user-facing text and the
//! `execution_metadata` populated on the terminal `FinalEvent`.

use super::locale;
use super::state::{NextAction, ProcessingStatus, StatePatch, WorkflowState};
use super::types::{NormalizedSource, TaskStatus};
use std::collections::HashMap;

pub struct FinalResponseNode;

impl FinalResponseNode {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, state: &WorkflowState) -> StatePatch {
        let language = state
            .semantic_routing
            .as_ref()
            .map(|r| r.detected_language.clone())
            .unwrap_or_else(|| "english".to_string());

        let is_chitchat = state
            .semantic_routing
            .as_ref()
            .map(|r| r.is_chitchat)
            .unwrap_or(false);

        let (response_text, sources, domains, processing_status) = if is_chitchat {
            (locale::chitchat_greeting(&language), vec![], vec![], ProcessingStatus::Completed)
        } else if let Some(resolution) = &state.conflict_resolution {
            let text = with_citations(&resolution.final_answer, &resolution.combined_sources, &language, usize::MAX);
            let domains = domains_from(&resolution.combined_sources);
            (text, resolution.combined_sources.clone(), domains, ProcessingStatus::Completed)
        } else if let Some(response) = first_successful(&state.agent_responses) {
            let text = with_citations(&response.content, &response.sources, &language, 3);
            let domains = domains_from(&response.sources);
            (text, response.sources.clone(), domains, ProcessingStatus::Completed)
        } else {
            // Not normally reached: the executor routes all-failed plans to the
            // error handler, which never hands back to this node.
            (locale::total_failure_message(&language), vec![], vec![], ProcessingStatus::Failed)
        };

        let quality_score = quality_score(state);
        let processing_time = state
            .agent_responses
            .iter()
            .map(|r| r.execution_time_seconds)
            .sum::<f64>();

        let mut metadata = HashMap::new();
        metadata.insert("total_documents".to_string(), serde_json::json!(sources.len()));
        metadata.insert("quality_score".to_string(), serde_json::json!(quality_score));
        metadata.insert("domains".to_string(), serde_json::json!(domains));
        metadata.insert("processing_time_seconds".to_string(), serde_json::json!(processing_time));

        StatePatch::new()
            .with_debug("final_response: response built")
            .tap(|p| {
                p.current_step = Some("final_response".to_string());
                p.next_action = Some(NextAction::Terminate);
                p.processing_status = Some(processing_status);
                p.progress_percentage = Some(100.0);
                p.progress_message = Some("completed".to_string());
                p.final_response = Some(response_text);
                p.final_sources_append = sources;
                p.execution_metadata = Some(metadata);
            })
    }
}

impl Default for FinalResponseNode {
    fn default() -> Self {
        Self::new()
    }
}

trait Tap: Sized {
    fn tap(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}
impl Tap for StatePatch {}

fn first_successful(responses: &[super::types::AgentResponse]) -> Option<&super::types::AgentResponse> {
    responses.iter().find(|r| r.status == TaskStatus::Completed)
}

/// Appends up to `limit` sources as a localized citation block. `limit =
/// usize::MAX` means "all of them" (the post-resolution shape).
fn with_citations(body: &str, sources: &[NormalizedSource], language: &str, limit: usize) -> String {
    if sources.is_empty() {
        return body.to_string();
    }
    let label = locale::sources_label(language);
    let lines: Vec<String> = sources
        .iter()
        .take(limit)
        .map(|s| {
            let title = s.title.as_deref().or(s.document_id.as_deref()).unwrap_or("untitled");
            match &s.url {
                Some(url) => format!("- {title} ({url})"),
                None => format!("- {title}"),
            }
        })
        .collect();
    format!("{body}\n\n{label}\n{}", lines.join("\n"))
}

fn domains_from(sources: &[NormalizedSource]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for s in sources {
        if let Some(collection) = &s.collection {
            if seen.insert(collection.clone()) {
                out.push(collection.clone());
            }
        }
    }
    out
}

fn quality_score(state: &WorkflowState) -> f32 {
    if let Some(resolution) = &state.conflict_resolution {
        return resolution.confidence_score;
    }
    let successes: Vec<f32> = state
        .agent_responses
        .iter()
        .filter(|r| r.status == TaskStatus::Completed)
        .map(|r| r.confidence)
        .collect();
    if successes.is_empty() {
        return 0.0;
    }
    successes.iter().sum::<f32>() / successes.len() as f32
}
