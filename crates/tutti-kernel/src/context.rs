//! Execution context — request scope, correlation ids, cancellation.
//!
//! A single context flows through plan generation, scheduling, and every
//! step/model call.  Cancellation is cooperative via a shared
//! [`CancellationToken`]; correlation ids (`request_id`,
//! `original_request_id`) ride along as baggage so logs and checkpoints can
//! be stitched across resumes.

use crate::checkpoint::RequestMode;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    /// Stable across resumes; equals `request_id` for fresh requests.
    pub original_request_id: String,
    pub request_mode: RequestMode,
    /// Set when running inside a workflow; forwarded as `X-Workflow-ID`.
    pub workflow_id: Option<String>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        Self {
            original_request_id: request_id.clone(),
            request_id,
            request_mode: RequestMode::default(),
            workflow_id: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context for a resumed request: new request id, inherited original id.
    pub fn resumed(
        request_id: impl Into<String>,
        original_request_id: impl Into<String>,
    ) -> Self {
        let mut ctx = Self::new(request_id);
        ctx.original_request_id = original_request_id.into();
        ctx
    }

    pub fn with_request_mode(mut self, mode: RequestMode) -> Self {
        self.request_mode = mode;
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Child scope sharing correlation ids; cancelling the parent cancels
    /// the child, not vice versa.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            original_request_id: self.original_request_id.clone(),
            request_mode: self.request_mode,
            workflow_id: self.workflow_id.clone(),
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Completes when this scope is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}
