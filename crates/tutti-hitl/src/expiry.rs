//! 过期处理器
//! Expiry processor
//!
//! Background sweep over due pending checkpoints.  The sweep is the one
//! place where replicas race over the same work, so every due checkpoint is
//! first claimed via compare-and-set on a lease key; claim losers skip and
//! count.  The winner applies the configured timeout policy, transitioning
//! to the matching `expired_*` status.  Callback panics are caught and
//! counted; `at_least_once` delivery re-queues the callback for the next
//! tick.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tutti_kernel::checkpoint::{CheckpointStatus, CheckpointStore, ExecutionCheckpoint};
use tutti_kernel::config::{DeliverySemantics, ExpiryConfig, TimeoutPolicy};
use tutti_kernel::error::OrchestratorResult;
use tutti_runtime::metrics::{Counter, Histogram};

/// Invoked once per checkpoint this instance expired.
#[async_trait]
pub trait ExpiryCallback: Send + Sync {
    async fn on_expired(&self, checkpoint: ExecutionCheckpoint, status: CheckpointStatus);
}

#[derive(Debug, Default)]
pub struct ExpiryMetrics {
    pub scans: Counter,
    pub claims_won: Counter,
    pub claims_skipped: Counter,
    pub transitions: Counter,
    pub callback_panics: Counter,
    pub requeued: Counter,
    pub scan_duration_ms: Histogram,
}


/// Outcome of one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub due: usize,
    pub claimed: usize,
    pub skipped: usize,
    pub transitioned: usize,
}

pub struct ExpiryProcessor {
    store: Arc<dyn CheckpointStore>,
    config: ExpiryConfig,
    instance_id: String,
    callback: Option<Arc<dyn ExpiryCallback>>,
    metrics: Arc<ExpiryMetrics>,
    /// Callbacks awaiting redelivery under `at_least_once`.
    retry_queue: Mutex<Vec<(ExecutionCheckpoint, CheckpointStatus)>>,
}

impl ExpiryProcessor {
    pub fn new(store: Arc<dyn CheckpointStore>, config: ExpiryConfig) -> Self {
        Self {
            store,
            config,
            instance_id: format!("expiry-{}", uuid::Uuid::new_v4()),
            callback: None,
            metrics: Arc::new(ExpiryMetrics::default()),
            retry_queue: Mutex::new(Vec::new()),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ExpiryCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn metrics(&self) -> Arc<ExpiryMetrics> {
        self.metrics.clone()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Start the background loop; stops when `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.scan_interval.max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                instance = %self.instance_id,
                interval_s = interval.as_secs(),
                "expiry processor started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(instance = %self.instance_id, "expiry processor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "expiry sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// One sweep tick.  Public so deployments (and tests) can drive it
    /// manually.
    pub async fn sweep(&self) -> OrchestratorResult<SweepStats> {
        let started = Instant::now();
        self.metrics.scans.inc();

        // Redeliveries first (at-least-once).
        let pending_retries: Vec<_> = std::mem::take(&mut *self.retry_queue.lock());
        for (checkpoint, status) in pending_retries {
            self.run_callback(checkpoint, status).await;
        }

        let batch_size = self.config.batch_size.min(10_000);
        let due = self.store.list_due(Utc::now(), batch_size).await?;
        let mut stats = SweepStats {
            due: due.len(),
            ..Default::default()
        };

        for checkpoint in due {
            let claimed = self
                .store
                .claim(
                    &checkpoint.checkpoint_id,
                    &self.instance_id,
                    self.config.claim_lease,
                )
                .await?;
            if !claimed {
                // Another replica owns it.
                self.metrics.claims_skipped.inc();
                stats.skipped += 1;
                continue;
            }
            self.metrics.claims_won.inc();
            stats.claimed += 1;

            let target = expired_status(self.config.timeout_policy);
            let transitioned = self
                .store
                .compare_and_set_status(
                    &checkpoint.checkpoint_id,
                    CheckpointStatus::Pending,
                    target,
                )
                .await?;

            if transitioned {
                self.metrics.transitions.inc();
                stats.transitioned += 1;
                debug!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    status = ?target,
                    "checkpoint expired"
                );
                self.run_callback(checkpoint.clone(), target).await;
            } else {
                // A human command landed between listing and claim.
                debug!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    "checkpoint no longer pending, skipping"
                );
            }

            self.store
                .release_claim(&checkpoint.checkpoint_id, &self.instance_id)
                .await?;
        }

        self.metrics.scan_duration_ms.observe_duration(started.elapsed());
        Ok(stats)
    }

    /// Run the callback in its own task so a panic is contained.
    async fn run_callback(&self, checkpoint: ExecutionCheckpoint, status: CheckpointStatus) {
        let Some(callback) = self.callback.clone() else {
            return;
        };
        let task_checkpoint = checkpoint.clone();
        let handle =
            tokio::spawn(async move { callback.on_expired(task_checkpoint, status).await });
        if let Err(e) = handle.await {
            if e.is_panic() {
                self.metrics.callback_panics.inc();
                warn!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    "expiry callback panicked"
                );
                if self.config.delivery_semantics == DeliverySemantics::AtLeastOnce {
                    self.metrics.requeued.inc();
                    self.retry_queue.lock().push((checkpoint, status));
                }
            }
        }
    }
}

/// Pure mapping from policy to the expired status it produces.
pub fn expired_status(policy: TimeoutPolicy) -> CheckpointStatus {
    match policy {
        TimeoutPolicy::ImplicitApprove => CheckpointStatus::ExpiredApproved,
        TimeoutPolicy::ImplicitReject => CheckpointStatus::ExpiredRejected,
        TimeoutPolicy::ImplicitAbort => CheckpointStatus::ExpiredAborted,
        TimeoutPolicy::ImplicitDeny => CheckpointStatus::Expired,
    }
}
