//! Router (§4.6): the pure function deciding which node runs next, driven
//! entirely by `WorkflowState::current_step` and `next_action`.

use super::state::{NextAction, WorkflowState};

/// One hop of the state machine. `Terminate` ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextNode {
    Reflection,
    Executor,
    ConflictResolver,
    FinalResponse,
    ErrorHandler,
    Terminate,
}

/// Implements the §4.6 routing table exactly: `(current_step, next_action) → next node`.
pub fn route(state: &WorkflowState) -> NextNode {
    match (state.current_step.as_str(), state.next_action) {
        ("orchestrator_entry", NextAction::Reflection) => NextNode::Reflection,
        ("reflection", NextAction::FinalResponse) => NextNode::FinalResponse,
        ("reflection", NextAction::ExecutePlanning) => NextNode::Executor,
        ("reflection", NextAction::Error) => NextNode::ErrorHandler,
        ("executor", NextAction::FinalResponse) => NextNode::FinalResponse,
        ("executor", NextAction::ConflictResolution) => NextNode::ConflictResolver,
        ("executor", NextAction::Error) => NextNode::ErrorHandler,
        ("conflict_resolver", _) => NextNode::FinalResponse,
        ("final_response", _) => NextNode::Terminate,
        ("error_handler", _) => NextNode::Terminate,
        _ => NextNode::ErrorHandler,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{AccessScope, UserContext, UserRole};

    fn state(step: &str, action: NextAction) -> WorkflowState {
        let ctx = UserContext::new("u1", "t1", UserRole::Admin, AccessScope::Both, "UTC", "en", "openai");
        let mut s = WorkflowState::initial("q".into(), vec![], ctx, "UTC".into(), "now".into());
        s.current_step = step.to_string();
        s.next_action = action;
        s
    }

    #[test]
    fn entry_always_goes_to_reflection() {
        assert_eq!(route(&state("orchestrator_entry", NextAction::Reflection)), NextNode::Reflection);
    }

    #[test]
    fn reflection_chitchat_goes_to_final_response() {
        assert_eq!(route(&state("reflection", NextAction::FinalResponse)), NextNode::FinalResponse);
    }

    #[test]
    fn reflection_plan_goes_to_executor() {
        assert_eq!(route(&state("reflection", NextAction::ExecutePlanning)), NextNode::Executor);
    }

    #[test]
    fn executor_single_agent_goes_to_final_response() {
        assert_eq!(route(&state("executor", NextAction::FinalResponse)), NextNode::FinalResponse);
    }

    #[test]
    fn executor_multi_agent_goes_to_conflict_resolver() {
        assert_eq!(route(&state("executor", NextAction::ConflictResolution)), NextNode::ConflictResolver);
    }

    #[test]
    fn executor_failure_goes_to_error_handler() {
        assert_eq!(route(&state("executor", NextAction::Error)), NextNode::ErrorHandler);
    }

    #[test]
    fn conflict_resolver_always_goes_to_final_response() {
        assert_eq!(route(&state("conflict_resolver", NextAction::FinalResponse)), NextNode::FinalResponse);
    }

    #[test]
    fn final_response_and_error_handler_terminate() {
        assert_eq!(route(&state("final_response", NextAction::Terminate)), NextNode::Terminate);
        assert_eq!(route(&state("error_handler", NextAction::Terminate)), NextNode::Terminate);
    }
}
