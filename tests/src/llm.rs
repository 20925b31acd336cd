//! Scripted LLM provider for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};
use tutti_kernel::llm::{Completion, CompletionRequest, LLMProvider};

/// Replays a fixed sequence of replies; the last reply repeats once the
/// script runs out.  Records every prompt for assertions.
pub struct MockLLMProvider {
    replies: Vec<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockLLMProvider {
    pub fn new(replies: Vec<impl Into<String>>) -> Self {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-1"
    }

    async fn generate(&self, request: CompletionRequest) -> OrchestratorResult<Completion> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt);
        let content = self
            .replies
            .get(index.min(self.replies.len().saturating_sub(1)))
            .cloned()
            .ok_or_else(|| OrchestratorError::LlmUnavailable("no scripted reply".into()))?;
        Ok(Completion {
            content,
            model: "mock-1".into(),
            provider: "mock".into(),
            usage: None,
        })
    }
}
