//! 路由决策缓存
//! Routing-decision cache
//!
//! Identical requests within the TTL reuse the previously generated plan
//! instead of paying another planning call.  Keys are the normalized request
//! text; entries are checked for expiry on read and swept opportunistically
//! on write.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use tutti_kernel::plan::RoutingPlan;

struct CacheEntry {
    plan: RoutingPlan,
    inserted_at: Instant,
}

pub struct PlanCache {
    enabled: bool,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl PlanCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn normalize(request: &str) -> String {
        request.trim().to_lowercase()
    }

    pub fn get(&self, request: &str) -> Option<RoutingPlan> {
        if !self.enabled {
            return None;
        }
        let key = Self::normalize(request);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!(request = %key, "plan cache hit");
                Some(entry.plan.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, request: &str, plan: RoutingPlan) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        entries.insert(
            Self::normalize(request),
            CacheEntry {
                plan,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
