// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// If you want to provide direct access (without having to navigate through the whole hierarchy) to certain types or functionalities at the crate level, you can use re-exports:

// Re-exporting key items for easier external access.
pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use cloudllm::llm_session::LLMSession;
pub use cloudllm::workflow;
// If you wish, you can also re-export specific clients or functionalities from the `clients` submodule:
// pub use cloudllm::clients::openai;

static LOGGER_INIT: std::sync::Once = std::sync::Once::new();

/// Initialize `env_logger` exactly once, safe to call from every test and example.
///
/// Tests that exercise real provider clients call this at the top of each `#[tokio::test]`
/// so `RUST_LOG=debug` surfaces request/response tracing without double-initializing the
/// global logger (which would panic on the second call).
pub fn init_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}
