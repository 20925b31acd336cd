//! 组件目录
//! Component catalog
//!
//! In-memory snapshot of known components and their typed capability
//! schemas, refreshed from discovery.  Reads clone an `Arc` snapshot under a
//! briefly-held lock; refresh builds a whole new snapshot and swaps it
//! atomically, so readers never observe a half-refreshed catalog.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tutti_kernel::component::{Capability, Component};
use tutti_kernel::discovery::{ComponentRecord, Discovery};
use tutti_kernel::error::OrchestratorResult;

type Snapshot = Arc<HashMap<String, Component>>;

/// Upgrades a raw discovery record into a full capability list.
///
/// The default fetcher synthesizes from whatever the registry record
/// carries; richer deployments fetch the enhanced schema from the component
/// itself.
#[async_trait]
pub trait CapabilityFetcher: Send + Sync {
    async fn fetch(&self, record: &ComponentRecord) -> OrchestratorResult<Vec<Capability>>;
}

/// Fetcher that trusts the registry record as-is.
pub struct RecordFetcher;

#[async_trait]
impl CapabilityFetcher for RecordFetcher {
    async fn fetch(&self, record: &ComponentRecord) -> OrchestratorResult<Vec<Capability>> {
        Ok(record.capabilities.clone())
    }
}

pub struct ComponentCatalog {
    snapshot: RwLock<Snapshot>,
    fetcher: Arc<dyn CapabilityFetcher>,
}

impl ComponentCatalog {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            fetcher: Arc::new(RecordFetcher),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn CapabilityFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Current snapshot; cheap to call, safe to hold across awaits.
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// Rebuild the snapshot from discovery.
    ///
    /// Best-effort: a component whose capability fetch fails keeps its
    /// last-known record; a failed listing leaves the snapshot untouched.
    pub async fn refresh(&self, discovery: &dyn Discovery) -> OrchestratorResult<usize> {
        let records = match discovery.list_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "catalog refresh: discovery listing failed, keeping snapshot");
                return Err(e);
            }
        };

        let previous = self.snapshot().await;
        let mut next: HashMap<String, Component> = HashMap::with_capacity(records.len());

        for record in records {
            let mut component = record.clone().into_component();
            match self.fetcher.fetch(&record).await {
                Ok(capabilities) if !capabilities.is_empty() => {
                    component.capabilities = capabilities;
                }
                Ok(_) => {
                    debug!(component = %component.name, "capability fetch returned nothing");
                }
                Err(e) => {
                    warn!(
                        component = %component.name,
                        error = %e,
                        "capability fetch failed, preserving last-known record"
                    );
                    if let Some(known) = previous.get(&component.id) {
                        component = known.clone();
                    }
                }
            }
            if let Err(e) = component.validate() {
                warn!(component = %component.id, error = %e, "skipping invalid component");
                continue;
            }
            next.insert(component.id.clone(), component);
        }

        let count = next.len();
        *self.snapshot.write().await = Arc::new(next);
        info!(components = count, "catalog refreshed");
        Ok(count)
    }

    /// Register a component directly (tests, static deployments).
    pub async fn register(&self, component: Component) -> OrchestratorResult<()> {
        component.validate()?;
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        next.insert(component.id.clone(), component);
        *guard = Arc::new(next);
        Ok(())
    }

    /// First component whose name matches.
    pub async fn find_component(&self, name: &str) -> Option<Component> {
        let snapshot = self.snapshot().await;
        snapshot.values().find(|c| c.name == name).cloned()
    }

    /// Capability lookup by `(component_name, capability_name)`; first match
    /// wins.
    pub async fn find_capability(
        &self,
        component_name: &str,
        capability_name: &str,
    ) -> Option<(Component, Capability)> {
        let component = self.find_component(component_name).await?;
        let capability = component.capability(capability_name)?.clone();
        Some((component, capability))
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn component_names(&self) -> Vec<String> {
        let snapshot = self.snapshot().await;
        let mut names: Vec<String> = snapshot.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }
}

impl Default for ComponentCatalog {
    fn default() -> Self {
        Self::new()
    }
}
