//! In-memory checkpoint store.
//!
//! Reference [`CheckpointStore`] for tests and single-node deployments.
//! `DashMap` shard locks make each compare-and-set atomic; the pending index
//! is recomputed per query, which is fine at in-memory scale.  Entries
//! outlive their TTL by a grace period so terminal records stay queryable
//! for a while after the expiry sweep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tutti_kernel::checkpoint::{
    CheckpointStatus, CheckpointStore, ClaimLease, ExecutionCheckpoint,
};
use tutti_kernel::error::{OrchestratorError, OrchestratorResult};

/// How long records stay readable past their TTL.
const EVICTION_GRACE: Duration = Duration::from_secs(3600);

struct StoredCheckpoint {
    checkpoint: ExecutionCheckpoint,
    evict_at: DateTime<Utc>,
}

pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<String, StoredCheckpoint>,
    claims: DashMap<String, ClaimLease>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: DashMap::new(),
            claims: DashMap::new(),
        }
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        self.checkpoints.retain(|_, stored| stored.evict_at > now);
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(
        &self,
        checkpoint: &ExecutionCheckpoint,
        ttl: Duration,
    ) -> OrchestratorResult<()> {
        let evict_at = Utc::now()
            + chrono::Duration::from_std(ttl + EVICTION_GRACE)
                .map_err(|e| OrchestratorError::Storage(e.to_string()))?;
        self.checkpoints.insert(
            checkpoint.checkpoint_id.clone(),
            StoredCheckpoint {
                checkpoint: checkpoint.clone(),
                evict_at,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        checkpoint_id: &str,
    ) -> OrchestratorResult<Option<ExecutionCheckpoint>> {
        self.evict_expired();
        Ok(self
            .checkpoints
            .get(checkpoint_id)
            .map(|stored| stored.checkpoint.clone()))
    }

    async fn compare_and_set_status(
        &self,
        checkpoint_id: &str,
        expected: CheckpointStatus,
        next: CheckpointStatus,
    ) -> OrchestratorResult<bool> {
        // get_mut holds the shard lock: check-and-swap is atomic.
        match self.checkpoints.get_mut(checkpoint_id) {
            Some(mut stored) => {
                if stored.checkpoint.status == expected {
                    stored.checkpoint.status = next;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => Err(OrchestratorError::CheckpointNotFound(
                checkpoint_id.to_string(),
            )),
        }
    }

    async fn update(&self, checkpoint: &ExecutionCheckpoint) -> OrchestratorResult<()> {
        match self.checkpoints.get_mut(&checkpoint.checkpoint_id) {
            Some(mut stored) => {
                stored.checkpoint = checkpoint.clone();
                Ok(())
            }
            None => Err(OrchestratorError::CheckpointNotFound(
                checkpoint.checkpoint_id.clone(),
            )),
        }
    }

    async fn list_pending(
        &self,
        request_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> OrchestratorResult<Vec<ExecutionCheckpoint>> {
        self.evict_expired();
        let mut pending: Vec<ExecutionCheckpoint> = self
            .checkpoints
            .iter()
            .filter(|entry| entry.checkpoint.status.is_pending())
            .filter(|entry| {
                request_id
                    .map(|id| {
                        entry.checkpoint.request_id == id
                            || entry.checkpoint.original_request_id == id
                    })
                    .unwrap_or(true)
            })
            .map(|entry| entry.checkpoint.clone())
            .collect();
        pending.sort_by_key(|c| c.expires_at);
        Ok(pending.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OrchestratorResult<Vec<ExecutionCheckpoint>> {
        let mut due: Vec<ExecutionCheckpoint> = self
            .checkpoints
            .iter()
            .filter(|entry| entry.checkpoint.is_due(now))
            .map(|entry| entry.checkpoint.clone())
            .collect();
        due.sort_by_key(|c| c.expires_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(
        &self,
        checkpoint_id: &str,
        owner_id: &str,
        lease: Duration,
    ) -> OrchestratorResult<bool> {
        let now = Utc::now();
        // The entry API locks the shard for the whole check-and-insert.
        let mut entry = self
            .claims
            .entry(checkpoint_id.to_string())
            .or_insert_with(|| ClaimLease {
                owner_id: String::new(),
                lease_expires_at: now,
            });
        let free = entry.owner_id.is_empty() || entry.is_expired(now);
        if free {
            *entry = ClaimLease::new(owner_id, lease);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_claim(
        &self,
        checkpoint_id: &str,
        owner_id: &str,
    ) -> OrchestratorResult<()> {
        self.claims
            .remove_if(checkpoint_id, |_, lease| lease.owner_id == owner_id);
        Ok(())
    }

    async fn delete(&self, checkpoint_id: &str) -> OrchestratorResult<bool> {
        self.claims.remove(checkpoint_id);
        Ok(self.checkpoints.remove(checkpoint_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tutti_kernel::checkpoint::InterruptPoint;
    use tutti_kernel::plan::RoutingPlan;

    fn checkpoint(wait: Duration) -> ExecutionCheckpoint {
        ExecutionCheckpoint::new(
            "req-1",
            InterruptPoint::BeforeStep,
            RoutingPlan::new("query"),
            wait,
        )
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        let ckpt = checkpoint(Duration::from_secs(60));
        store.put(&ckpt, Duration::from_secs(60)).await.unwrap();

        let loaded = store.get(&ckpt.checkpoint_id).await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, ckpt.checkpoint_id);
        assert!(loaded.status.is_pending());

        assert!(store.get("no-such-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cas_single_winner() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ckpt = checkpoint(Duration::from_secs(60));
        store.put(&ckpt, Duration::from_secs(60)).await.unwrap();

        // Two concurrent commands on the same pending checkpoint: exactly
        // one CAS succeeds.
        let mut handles = Vec::new();
        for next in [CheckpointStatus::Approved, CheckpointStatus::Rejected] {
            let store = store.clone();
            let id = ckpt.checkpoint_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set_status(&id, CheckpointStatus::Pending, next)
                    .await
                    .unwrap()
            }));
        }
        let outcomes: Vec<bool> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(outcomes.iter().filter(|b| **b).count(), 1);
    }

    #[tokio::test]
    async fn test_claim_at_most_once_across_contenders() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ckpt = checkpoint(Duration::from_millis(0));
        store.put(&ckpt, Duration::from_secs(60)).await.unwrap();

        let mut handles = Vec::new();
        for replica in 0..8 {
            let store = store.clone();
            let id = ckpt.checkpoint_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim(&id, &format!("replica-{replica}"), Duration::from_secs(30))
                    .await
                    .unwrap()
            }));
        }
        let won: usize = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(won, 1, "exactly one replica may claim a due checkpoint");
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let store = InMemoryCheckpointStore::new();
        let ckpt = checkpoint(Duration::from_secs(60));
        store.put(&ckpt, Duration::from_secs(60)).await.unwrap();

        assert!(
            store
                .claim(&ckpt.checkpoint_id, "a", Duration::from_millis(0))
                .await
                .unwrap()
        );
        // Lease of zero duration expires immediately — b can recover it.
        assert!(
            store
                .claim(&ckpt.checkpoint_id, "b", Duration::from_secs(30))
                .await
                .unwrap()
        );
        // And a cannot steal it back while b's lease is live.
        assert!(
            !store
                .claim(&ckpt.checkpoint_id, "a", Duration::from_secs(30))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_release_claim_respects_owner() {
        let store = InMemoryCheckpointStore::new();
        let ckpt = checkpoint(Duration::from_secs(60));
        store.put(&ckpt, Duration::from_secs(60)).await.unwrap();

        store
            .claim(&ckpt.checkpoint_id, "owner-a", Duration::from_secs(30))
            .await
            .unwrap();
        // Another owner's release is a no-op.
        store
            .release_claim(&ckpt.checkpoint_id, "owner-b")
            .await
            .unwrap();
        assert!(
            !store
                .claim(&ckpt.checkpoint_id, "owner-b", Duration::from_secs(30))
                .await
                .unwrap()
        );

        store
            .release_claim(&ckpt.checkpoint_id, "owner-a")
            .await
            .unwrap();
        assert!(
            store
                .claim(&ckpt.checkpoint_id, "owner-b", Duration::from_secs(30))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_list_due_ordered_and_capped() {
        let store = InMemoryCheckpointStore::new();
        for wait_ms in [50u64, 10, 30] {
            let ckpt = checkpoint(Duration::from_millis(wait_ms));
            store.put(&ckpt, Duration::from_secs(60)).await.unwrap();
        }
        // Not yet due
        let later = checkpoint(Duration::from_secs(600));
        store.put(&later, Duration::from_secs(600)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let due = store.list_due(Utc::now(), 2).await.unwrap();
        assert_eq!(due.len(), 2, "batch cap respected");
        assert!(due[0].expires_at <= due[1].expires_at);
    }

    #[tokio::test]
    async fn test_list_pending_filters_by_request() {
        let store = InMemoryCheckpointStore::new();
        let ours = checkpoint(Duration::from_secs(60));
        store.put(&ours, Duration::from_secs(60)).await.unwrap();

        let mut theirs = checkpoint(Duration::from_secs(60));
        theirs.request_id = "req-2".into();
        theirs.original_request_id = "req-2".into();
        store.put(&theirs, Duration::from_secs(60)).await.unwrap();

        let listed = store.list_pending(Some("req-1"), 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].request_id, "req-1");

        let all = store.list_pending(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
