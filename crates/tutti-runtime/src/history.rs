//! 执行历史
//! Execution history
//!
//! Bounded ring buffer of recent execution results, trimmed to
//! `history_size`.  Guarded by a mutex; recording is a hot-path append so
//! the lock is held only for the push-and-trim.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tutti_kernel::plan::ExecutionResult;

/// One remembered execution.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub request_id: String,
    pub original_request: String,
    pub result: ExecutionResult,
    pub recorded_at: DateTime<Utc>,
}

pub struct ExecutionHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn record(
        &self,
        request_id: impl Into<String>,
        original_request: impl Into<String>,
        result: ExecutionResult,
    ) {
        let entry = HistoryEntry {
            request_id: request_id.into(),
            original_request: original_request.into(),
            result,
            recorded_at: Utc::now(),
        };
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
