//! Checkpoint model and store contract — the durable suspension surface.
//!
//! A checkpoint is the only execution state that survives a process restart:
//! it records a suspended plan, what already completed, and what a human (or
//! the expiry sweep) decided about it.  The [`CheckpointStore`] trait is the
//! single cross-replica coordination surface; every status transition and
//! claim goes through compare-and-set.

use crate::error::OrchestratorResult;
use crate::plan::{RoutingPlan, StepResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Interrupt points
// ─────────────────────────────────────────────────────────────────────────────

/// Policy-selected location where execution may suspend for human input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPoint {
    PlanGenerated,
    BeforeStep,
    AfterStep,
    ErrorDetected,
}

// ─────────────────────────────────────────────────────────────────────────────
// Status machine
// ─────────────────────────────────────────────────────────────────────────────

/// Checkpoint lifecycle status.
///
/// The `expired_*` trio preserves which implicit policy fired, so
/// resumable-vs-terminal stays a pure function of the status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Edited,
    Rejected,
    Aborted,
    Completed,
    Expired,
    ExpiredApproved,
    ExpiredRejected,
    ExpiredAborted,
}

impl CheckpointStatus {
    /// Awaiting a response.
    pub fn is_pending(&self) -> bool {
        matches!(self, CheckpointStatus::Pending)
    }

    /// Resumable = {approved, edited, expired_approved}.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            CheckpointStatus::Approved
                | CheckpointStatus::Edited
                | CheckpointStatus::ExpiredApproved
        )
    }

    /// Terminal = {completed, rejected, aborted, expired, expired_rejected,
    /// expired_aborted}.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointStatus::Completed
                | CheckpointStatus::Rejected
                | CheckpointStatus::Aborted
                | CheckpointStatus::Expired
                | CheckpointStatus::ExpiredRejected
                | CheckpointStatus::ExpiredAborted
        )
    }

    /// Allowed direct transitions of the status machine.
    pub fn can_transition_to(&self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        match self {
            Pending => matches!(
                next,
                Approved | Edited | Rejected | Aborted | Expired | ExpiredApproved
                    | ExpiredRejected | ExpiredAborted
            ),
            Approved | Edited | ExpiredApproved => matches!(next, Completed),
            _ => false,
        }
    }
}

/// How the originating request expects its response delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Streaming,
    #[default]
    NonStreaming,
}

// ─────────────────────────────────────────────────────────────────────────────
// Claim lease
// ─────────────────────────────────────────────────────────────────────────────

/// Short-lived exclusivity lease on a due checkpoint.
///
/// Lease expiry allows recovery from a crashed claimant without a
/// coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimLease {
    pub owner_id: String,
    pub lease_expires_at: DateTime<Utc>,
}

impl ClaimLease {
    pub fn new(owner_id: impl Into<String>, lease: Duration) -> Self {
        Self {
            owner_id: owner_id.into(),
            lease_expires_at: Utc::now()
                + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at <= now
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkpoint record
// ─────────────────────────────────────────────────────────────────────────────

/// Durable suspension record for human-in-the-loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    pub checkpoint_id: String,
    pub request_id: String,
    /// Stable across resumes: a resumed request inherits the original id.
    pub original_request_id: String,
    pub interrupt_point: InterruptPoint,
    pub status: CheckpointStatus,
    #[serde(default)]
    pub request_mode: RequestMode,
    /// Plan snapshot at suspension time.
    pub plan: RoutingPlan,
    /// Results of steps completed before the suspension.
    #[serde(default)]
    pub completed_results: Vec<StepResult>,
    /// Step the suspension concerns, when point is before/after a step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Parameters resolved for the current step, if any.
    #[serde(default)]
    pub resolved_parameters: BTreeMap<String, Value>,
    /// Free-form context surfaced to the human making the decision.
    #[serde(default)]
    pub decision_metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimLease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<Value>,
}

impl ExecutionCheckpoint {
    pub fn new(
        request_id: impl Into<String>,
        interrupt_point: InterruptPoint,
        plan: RoutingPlan,
        wait_window: Duration,
    ) -> Self {
        let request_id = request_id.into();
        let now = Utc::now();
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            original_request_id: request_id.clone(),
            request_id,
            interrupt_point,
            status: CheckpointStatus::Pending,
            request_mode: RequestMode::default(),
            plan,
            completed_results: Vec::new(),
            current_step: None,
            resolved_parameters: BTreeMap::new(),
            decision_metadata: BTreeMap::new(),
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(wait_window).unwrap_or(chrono::Duration::zero()),
            claim: None,
            user_context: None,
        }
    }

    pub fn with_original_request_id(mut self, id: impl Into<String>) -> Self {
        self.original_request_id = id.into();
        self
    }

    pub fn with_request_mode(mut self, mode: RequestMode) -> Self {
        self.request_mode = mode;
        self
    }

    pub fn with_current_step(mut self, step_id: impl Into<String>) -> Self {
        self.current_step = Some(step_id.into());
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pending() && self.expires_at <= now
    }

    /// Whether the claim slot is free: no claim, or the lease ran out.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match &self.claim {
            None => true,
            Some(lease) => lease.is_expired(now),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel contract for checkpoint persistence.
///
/// Key layout (storage-agnostic):
/// - `checkpoint:{id}` → serialized checkpoint, TTL = wait window
/// - `checkpoint_index:pending` → secondary index keyed by `expires_at`
/// - `claim:{checkpoint_id}` → `{owner_id, lease_expires_at}`
///
/// Implementations must make `compare_and_set_status` and `claim` atomic;
/// they are what gives commands and the expiry sweep their exactly-one-winner
/// semantics across replicas.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a new checkpoint with the given TTL.
    async fn put(
        &self,
        checkpoint: &ExecutionCheckpoint,
        ttl: Duration,
    ) -> OrchestratorResult<()>;

    /// Load a checkpoint by id.  `Ok(None)` if absent or TTL-evicted.
    async fn get(&self, checkpoint_id: &str) -> OrchestratorResult<Option<ExecutionCheckpoint>>;

    /// Atomically transition `expected → next`; returns `false` when the
    /// current status no longer matches `expected`.
    async fn compare_and_set_status(
        &self,
        checkpoint_id: &str,
        expected: CheckpointStatus,
        next: CheckpointStatus,
    ) -> OrchestratorResult<bool>;

    /// Overwrite checkpoint content (plan edits, appended results).  Status
    /// changes must go through `compare_and_set_status`.
    async fn update(&self, checkpoint: &ExecutionCheckpoint) -> OrchestratorResult<()>;

    /// Pending checkpoints, optionally filtered by request id, paginated.
    async fn list_pending(
        &self,
        request_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> OrchestratorResult<Vec<ExecutionCheckpoint>>;

    /// Pending checkpoints with `expires_at <= now`, via the secondary index.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OrchestratorResult<Vec<ExecutionCheckpoint>>;

    /// Atomically claim a due checkpoint for this instance.  Succeeds iff
    /// unclaimed or the existing lease expired.
    async fn claim(
        &self,
        checkpoint_id: &str,
        owner_id: &str,
        lease: Duration,
    ) -> OrchestratorResult<bool>;

    /// Release a claim held by `owner_id`; other owners' claims are left
    /// untouched.
    async fn release_claim(&self, checkpoint_id: &str, owner_id: &str)
        -> OrchestratorResult<()>;

    /// Remove a checkpoint outright.
    async fn delete(&self, checkpoint_id: &str) -> OrchestratorResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories_are_exclusive() {
        use CheckpointStatus::*;
        let all = [
            Pending,
            Approved,
            Edited,
            Rejected,
            Aborted,
            Completed,
            Expired,
            ExpiredApproved,
            ExpiredRejected,
            ExpiredAborted,
        ];
        for status in all {
            let categories = [
                status.is_pending(),
                status.is_resumable(),
                status.is_terminal(),
            ];
            assert_eq!(
                categories.iter().filter(|c| **c).count(),
                1,
                "{status:?} must fall in exactly one category"
            );
        }
    }

    #[test]
    fn test_expired_approved_is_resumable() {
        assert!(CheckpointStatus::ExpiredApproved.is_resumable());
        assert!(CheckpointStatus::ExpiredRejected.is_terminal());
        assert!(CheckpointStatus::ExpiredAborted.is_terminal());
    }

    #[test]
    fn test_transition_rules() {
        use CheckpointStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(ExpiredRejected));
        assert!(Approved.can_transition_to(Completed));
        assert!(ExpiredApproved.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Completed));
    }

    #[test]
    fn test_claimable_when_lease_expired() {
        let plan = RoutingPlan::new("req");
        let mut ckpt = ExecutionCheckpoint::new(
            "req-1",
            InterruptPoint::BeforeStep,
            plan,
            Duration::from_secs(60),
        );
        let now = Utc::now();
        assert!(ckpt.is_claimable(now));

        ckpt.claim = Some(ClaimLease {
            owner_id: "replica-a".into(),
            lease_expires_at: now + chrono::Duration::seconds(30),
        });
        assert!(!ckpt.is_claimable(now));

        ckpt.claim = Some(ClaimLease {
            owner_id: "replica-a".into(),
            lease_expires_at: now - chrono::Duration::seconds(1),
        });
        assert!(ckpt.is_claimable(now));
    }

    #[test]
    fn test_status_serde_snake_case() {
        let s = serde_json::to_string(&CheckpointStatus::ExpiredApproved).unwrap();
        assert_eq!(s, "\"expired_approved\"");
    }
}
