use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::types::*;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Streaming response type
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = OrchestratorResult<StreamChunk>> + Send>>;

/// Canonical LLM provider trait (kernel-owned)
///
/// The orchestrator only ever needs the request/response `generate` call;
/// streaming and function-calling are optional refinements that providers
/// opt into via the capability probes.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Default model
    fn default_model(&self) -> &str {
        ""
    }

    /// Supports streaming?
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Supports function calling?
    fn supports_functions(&self) -> bool {
        false
    }

    /// Completion request
    async fn generate(&self, request: CompletionRequest) -> OrchestratorResult<Completion>;

    /// Streaming completion (default: not supported)
    async fn generate_stream(
        &self,
        _request: CompletionRequest,
    ) -> OrchestratorResult<CompletionStream> {
        Err(OrchestratorError::LlmUnavailable(format!(
            "Provider {} does not support streaming",
            self.name()
        )))
    }

    /// Function-calling completion (default: not supported)
    async fn generate_with_functions(
        &self,
        _request: CompletionRequest,
        _functions: &[FunctionDef],
    ) -> OrchestratorResult<FunctionCallOutcome> {
        Err(OrchestratorError::LlmUnavailable(format!(
            "Provider {} does not support function calling",
            self.name()
        )))
    }

    /// Health check
    async fn health_check(&self) -> OrchestratorResult<bool> {
        Ok(true)
    }
}
