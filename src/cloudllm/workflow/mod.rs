//! Multi-agent workflow engine: reflection → execution → conflict
//! resolution → final response, driven by a pure router over a partial-state
//! record threaded node to node (see `engine` for the orchestrator entry).

mod config;
mod conflict;
mod datetime_ctx;
mod engine;
mod error_node;
mod errors;
mod executor;
mod final_response;
mod locale;
mod progress;
mod providers;
mod reflection;
mod registry;
mod router;
mod sources;
mod state;
mod types;

pub use config::EngineConfig;
pub use engine::{RunHandle, WorkflowEngine};
pub use errors::{EngineError, EngineResult};
pub use executor::{AgentExecutor, ToolInvocationOutcome, ToolInvocationRequest};
pub use progress::{FinalEvent, FinalMetadata, ProgressBusReceiver, ProgressEvent, StreamItem, TaskView};
pub use providers::{ClientWrapperProvider, LlmInvocationResult, LlmProvider};
pub use registry::{AgentRegistry, AgentSource};
pub use types::{
    AccessScope, AgentDescriptor, ChatMessage, ChatRole, ConflictLevel, ConflictResolution,
    ExecutionPlan, NormalizedSource, ProviderDescriptor, ResolutionMethod, RunRequest,
    SemanticRouting, Step, Task, ToolCall, ToolDescriptor, UserContext, UserRole,
};
