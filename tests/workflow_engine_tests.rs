//! End-to-end coverage of the workflow engine's public surface: one run from
//! `RunRequest` in to a single terminal `FinalEvent` out, exercising the
//! multi-agent conflict-resolution and total-failure paths that unit tests
//! inside the crate cover only node by node.

use async_trait::async_trait;
use cloudllm_workflow::workflow::{
    AccessScope, AgentDescriptor, AgentExecutor, AgentRegistry, AgentSource, EngineConfig,
    EngineResult, LlmInvocationResult, LlmProvider, ProviderDescriptor, RunRequest, StreamItem,
    ToolDescriptor, ToolInvocationOutcome, ToolInvocationRequest, UserContext, UserRole,
    WorkflowEngine,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedProvider {
    responses: Mutex<Vec<Result<String, String>>>,
}

impl ScriptedProvider {
    fn ok(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.to_string())).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn invoke(
        &self,
        _prompt: &str,
        _tenant_id: &str,
        _json_mode: bool,
        _temperature: f32,
        _max_tokens: u32,
    ) -> EngineResult<LlmInvocationResult> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err("scripted provider exhausted".into());
        }
        match responses.remove(0) {
            Ok(content) => Ok(LlmInvocationResult { content }),
            Err(e) => Err(e.into()),
        }
    }
}

struct FixedAgentSource(Vec<AgentDescriptor>);

#[async_trait]
impl AgentSource for FixedAgentSource {
    async fn list_tenant_agents(&self, _tenant_id: &str) -> Vec<AgentDescriptor> {
        self.0.clone()
    }
}

/// Echoes the agent name back so responses are trivially distinguishable,
/// and always succeeds (scenario S3 needs both agents to complete).
struct EchoExecutor;

#[async_trait]
impl AgentExecutor for EchoExecutor {
    async fn invoke_tool(&self, request: ToolInvocationRequest) -> EngineResult<ToolInvocationOutcome> {
        Ok(ToolInvocationOutcome {
            content: format!("{} answer via {}", request.agent_name, request.tool_name),
            confidence: 0.9,
            sources: vec![],
            metadata: Default::default(),
        })
    }
}

/// Always fails, for scenario S5 (total failure).
struct FailingExecutor;

#[async_trait]
impl AgentExecutor for FailingExecutor {
    async fn invoke_tool(&self, _request: ToolInvocationRequest) -> EngineResult<ToolInvocationOutcome> {
        Err("tool backend unreachable".into())
    }
}

fn agent(name: &str) -> AgentDescriptor {
    AgentDescriptor {
        agent_id: format!("a-{name}"),
        agent_name: name.to_string(),
        description: String::new(),
        department_name: format!("{name}-dept"),
        tools: vec![ToolDescriptor {
            name: "rag_tool".to_string(),
            description: String::new(),
            access_level: Some(AccessScope::Public),
            category: "general".to_string(),
        }],
        provider_ref: ProviderDescriptor {
            provider_name: "openai".to_string(),
            api_keys: vec!["k".to_string()],
            model_name: "gpt-4o".to_string(),
            model_config: Default::default(),
        },
    }
}

fn request(query: &str) -> RunRequest {
    RunRequest {
        query: query.to_string(),
        messages: vec![],
        user_context: UserContext::new("u1", "tenant-a", UserRole::Admin, AccessScope::Both, "UTC", "en", "openai"),
        tenant_timezone: "UTC".to_string(),
        tenant_current_datetime: Some("2026-07-30T00:00:00Z".to_string()),
    }
}

/// S3 — parallel agents, conflict resolution.
#[tokio::test]
async fn parallel_agents_trigger_conflict_resolution_and_yield_one_final_event() {
    let provider = Arc::new(ScriptedProvider::ok(vec![
        r#"{"detected_language":"english","is_chitchat":false,"refined_query":"compare policies","summary_history":""}"#,
        r#"{"total_steps":1,"current_step":0,"aggregate_status":"pending","steps":[{"step_id":"step_1","step_number":1,"parallel_execution":true,"status":"pending","tasks":[{"agent":"hr","agent_id":"a-hr","purpose":"hr policy","tools":[{"tool":"rag_tool","message":"hr leave policy"}],"queries":[],"status":"pending","retry_attempts":0,"retry_history":[],"result":null},{"agent":"finance","agent_id":"a-finance","purpose":"finance policy","tools":[{"tool":"rag_tool","message":"reimbursement policy"}],"queries":[],"status":"pending","retry_attempts":0,"retry_history":[],"result":null}]}]}"#,
        r#"{"final_answer":"HR leave and Finance reimbursement differ as follows...","winning_agents":["hr","finance"],"conflict_level":"medium","resolution_method":"combination","evidence_ranking":[],"resolution_reasoning":"both contributed distinct facts","combined_sources":[],"confidence_score":0.82}"#,
    ]));
    let registry = Arc::new(AgentRegistry::new(
        Box::new(FixedAgentSource(vec![agent("hr"), agent("finance")])),
        Duration::from_secs(300),
    ));
    let engine = WorkflowEngine::new(registry, provider, Arc::new(EchoExecutor), EngineConfig::default());
    let mut handle = engine.run(request("Compare HR leave policy and Finance reimbursement policy."));

    let mut saw_conflict_progress = false;
    let mut final_event = None;
    while let Some(item) = handle.receiver.recv().await {
        match item {
            StreamItem::Progress(e) if e.processing_status == "conflict_resolution_needed" => {
                saw_conflict_progress = true;
            }
            StreamItem::Final(e) => final_event = Some(e),
            _ => {}
        }
    }

    assert!(saw_conflict_progress);
    let event = final_event.expect("exactly one final event");
    assert!(event.final_response.starts_with("HR leave and Finance reimbursement differ"));
    assert_eq!(event.processing_status, "completed");
}

/// S5 — total failure: every task exhausts retries, no stack trace or
/// exception name leaks into the user-facing text.
#[tokio::test]
async fn total_failure_yields_localized_apology_with_no_internal_detail() {
    let provider = Arc::new(ScriptedProvider::ok(vec![
        r#"{"detected_language":"english","is_chitchat":false,"refined_query":"find the policy","summary_history":""}"#,
        r#"{"total_steps":1,"current_step":0,"aggregate_status":"pending","steps":[{"step_id":"step_1","step_number":1,"parallel_execution":false,"status":"pending","tasks":[{"agent":"hr","agent_id":"a-hr","purpose":"find policy","tools":[{"tool":"rag_tool","message":"look up policy"}],"queries":[],"status":"pending","retry_attempts":0,"retry_history":[],"result":null}]}]}"#,
    ]));
    let registry = Arc::new(AgentRegistry::new(
        Box::new(FixedAgentSource(vec![agent("hr")])),
        Duration::from_secs(300),
    ));
    let mut fast_config = EngineConfig::default();
    fast_config.retry_backoff_factor_seconds = 0.001;
    let engine = WorkflowEngine::new(registry, provider, Arc::new(FailingExecutor), fast_config);
    let mut handle = engine.run(request("find the policy"));

    let mut final_event = None;
    while let Some(item) = handle.receiver.recv().await {
        if let StreamItem::Final(e) = item {
            final_event = Some(e);
        }
    }

    let event = final_event.expect("exactly one final event");
    assert_eq!(event.processing_status, "failed");
    assert!(!event.final_response.to_lowercase().contains("alltasksfailed"));
    assert!(!event.final_response.to_lowercase().contains("panic"));
    assert!(!event.final_response.to_lowercase().contains("unreachable"));
}

/// Cancellation requested before a run starts settles quickly via the
/// error handler rather than hanging.
#[tokio::test]
async fn cancelling_a_run_settles_without_hanging() {
    let provider = Arc::new(ScriptedProvider::ok(vec![
        r#"{"detected_language":"english","is_chitchat":false,"refined_query":"find the policy","summary_history":""}"#,
    ]));
    let registry = Arc::new(AgentRegistry::new(
        Box::new(FixedAgentSource(vec![agent("hr")])),
        Duration::from_secs(300),
    ));
    let engine = WorkflowEngine::new(registry, provider, Arc::new(EchoExecutor), EngineConfig::default());
    let handle = engine.run(request("find the policy"));
    handle.cancel();

    let mut receiver = handle.receiver;
    let mut final_event = None;
    while let Some(item) = receiver.recv().await {
        if let StreamItem::Final(e) = item {
            final_event = Some(e);
        }
    }
    assert!(final_event.is_some());
}
