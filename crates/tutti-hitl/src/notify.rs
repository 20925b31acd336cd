//! Checkpoint notification.
//!
//! Fires when a checkpoint is persisted so a human (or their inbox) learns
//! about the pending decision.  Failures are recorded and never fatal — a
//! down webhook must not block suspension.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use tutti_kernel::checkpoint::ExecutionCheckpoint;

#[async_trait]
pub trait CheckpointNotifier: Send + Sync {
    async fn notify(&self, checkpoint: &ExecutionCheckpoint);
}

/// POSTs a compact checkpoint event to a webhook URL.
pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CheckpointNotifier for WebhookNotifier {
    async fn notify(&self, checkpoint: &ExecutionCheckpoint) {
        let event = json!({
            "event": "checkpoint_pending",
            "checkpoint_id": checkpoint.checkpoint_id,
            "request_id": checkpoint.request_id,
            "interrupt_point": checkpoint.interrupt_point,
            "current_step": checkpoint.current_step,
            "expires_at": checkpoint.expires_at,
        });

        match self.http.post(&self.url).json(&event).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(checkpoint_id = %checkpoint.checkpoint_id, "checkpoint notification delivered");
            }
            Ok(response) => {
                warn!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    status = response.status().as_u16(),
                    "checkpoint notification rejected"
                );
            }
            Err(e) => {
                warn!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    error = %e,
                    "checkpoint notification failed"
                );
            }
        }
    }
}
