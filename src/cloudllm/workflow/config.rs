//! Engine-wide configuration.
//!
//! Follows the base crate's `CloudLLMConfig` philosophy: a plain struct with
//! a manual `Default` impl, no file-format parsing dependency. Values can
//! also be pulled from the process environment via [`EngineConfig::from_env`],
//! which falls back silently to the documented defaults on missing or
//! unparseable variables.

use std::env;
use std::time::Duration;

/// Tunables honored by the workflow engine (§6.6).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum attempts per task (initial + retries). Default `3`.
    pub max_retry: u32,
    /// Maximum whole-workflow retries. Default `2`.
    pub max_workflow_retry: u32,
    /// Per-call LLM invocation timeout. Default 120s.
    pub llm_call_timeout: Duration,
    /// History turns fed to the semantic-determination call. Default `5`.
    pub history_turns_for_semantics: usize,
    /// History turns fed to the plan-generation call. Default `3`.
    pub history_turns_for_planning: usize,
    /// `max_tokens` sent on reflection/conflict-resolution calls. Default `4096`.
    pub max_tokens: u32,
    /// Default sampling temperature when `UserContext::temperature` is unset. Default `0.1`.
    pub default_temperature: f32,
    /// Capacity of the progress bus's bounded channel. Default `64`.
    pub progress_queue_capacity: usize,
    /// Maximum length of a normalized source snippet. Default `400`.
    pub source_snippet_max_chars: usize,
    /// Linear backoff factor between retry attempts, in seconds. Default `0.1`.
    pub retry_backoff_factor_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            max_workflow_retry: 2,
            llm_call_timeout: Duration::from_secs(120),
            history_turns_for_semantics: 5,
            history_turns_for_planning: 3,
            max_tokens: 4096,
            default_temperature: 0.1,
            progress_queue_capacity: 64,
            source_snippet_max_chars: 400,
            retry_backoff_factor_seconds: 0.1,
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables, falling back to
    /// [`EngineConfig::default`] field-by-field when a variable is absent or
    /// fails to parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retry: env_u32("MAX_RETRY", defaults.max_retry),
            max_workflow_retry: env_u32("MAX_WORKFLOW_RETRY", defaults.max_workflow_retry),
            llm_call_timeout: Duration::from_secs(env_u64(
                "LLM_CALL_TIMEOUT_SECONDS",
                defaults.llm_call_timeout.as_secs(),
            )),
            history_turns_for_semantics: env_usize(
                "HISTORY_TURNS_FOR_SEMANTICS",
                defaults.history_turns_for_semantics,
            ),
            history_turns_for_planning: env_usize(
                "HISTORY_TURNS_FOR_PLANNING",
                defaults.history_turns_for_planning,
            ),
            max_tokens: env_u32("MAX_TOKENS", defaults.max_tokens),
            default_temperature: env_f32("DEFAULT_TEMPERATURE", defaults.default_temperature),
            progress_queue_capacity: env_usize(
                "PROGRESS_QUEUE_CAPACITY",
                defaults.progress_queue_capacity,
            ),
            source_snippet_max_chars: env_usize(
                "SOURCE_SNIPPET_MAX_CHARS",
                defaults.source_snippet_max_chars,
            ),
            retry_backoff_factor_seconds: env_f64(
                "RETRY_BACKOFF_FACTOR_SECONDS",
                defaults.retry_backoff_factor_seconds,
            ),
        }
    }

    /// Linear backoff delay before attempt `attempt` (1-based), per §4.2.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_factor_seconds * attempt as f64)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
