//! Error taxonomy for the workflow engine (§7).
//!
//! Mirrors the base crate's `OrchestrationError`/`ToolProtocolError` pattern:
//! a plain enum with a manual `Display`/`Error` impl rather than a
//! derive-macro crate, so the dependency set stays unchanged from the base
//! crate's.

use std::error::Error;
use std::fmt;

/// One of the six failure kinds from §7's taxonomy. Carries only the minimal
/// context needed to build the `error_message`/`exception_type` pair surfaced
/// to the Error Node — never a stack trace or provider name.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Reflection produced bad JSON, referenced an unknown agent/tool, or no
    /// provider config exists for a referenced agent.
    Planning(String),
    /// A tool/LLM call inside a task failed. Recovered locally via retry;
    /// only reaches the Error Node if every task in the plan terminally fails.
    Execution(String),
    /// Every task in the plan reached a terminal `failed` status.
    AllTasksFailed(String),
    /// The conflict-resolution LLM call failed or returned invalid JSON.
    /// Never fatal — the node falls back to §4.3's highest-confidence rule.
    Resolution(String),
    /// The run was cancelled via the engine's cancellation signal.
    Cancelled,
    /// Any unexpected failure not covered by the above.
    Unknown(String),
}

impl EngineError {
    /// The `exception_type` string carried on `WorkflowState`/`FinalEvent`,
    /// matching §7's taxonomy names exactly.
    pub fn exception_type(&self) -> &'static str {
        match self {
            EngineError::Planning(_) => "PlanningError",
            EngineError::Execution(_) => "ExecutionError",
            EngineError::AllTasksFailed(_) => "AllTasksFailed",
            EngineError::Resolution(_) => "ResolutionError",
            EngineError::Cancelled => "Cancelled",
            EngineError::Unknown(_) => "UnknownError",
        }
    }

    /// The technical message, for logging only — never shown to the end user.
    pub fn technical_message(&self) -> String {
        match self {
            EngineError::Planning(m)
            | EngineError::Execution(m)
            | EngineError::AllTasksFailed(m)
            | EngineError::Resolution(m)
            | EngineError::Unknown(m) => m.clone(),
            EngineError::Cancelled => "workflow run was cancelled".to_string(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type(), self.technical_message())
    }
}

impl Error for EngineError {}

/// Boxed-trait-object alias used at `async_trait` seams, matching
/// `ClientWrapper::send_message`'s return type in the base crate.
pub type EngineResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

impl From<EngineError> for Box<dyn Error + Send + Sync> {
    fn from(e: EngineError) -> Self {
        Box::new(EngineErrorSendSync(e))
    }
}

/// `EngineError` as written carries `String` payloads so it is already
/// `Send + Sync`; this newtype exists purely so `From<EngineError>` can
/// target the `Box<dyn Error + Send + Sync>` alias used across `async_trait`
/// boundaries without relying on auto-trait leakage through `Box<dyn Error>`.
#[derive(Debug)]
struct EngineErrorSendSync(EngineError);

impl fmt::Display for EngineErrorSendSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for EngineErrorSendSync {}
