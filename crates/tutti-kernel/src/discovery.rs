//! Discovery contract — kernel abstraction over the component registry.
//!
//! The orchestrator never talks to a concrete registry directly; it refreshes
//! its catalog through this trait.  Concrete implementations (service mesh,
//! Consul, static config …) live outside the kernel.

use crate::component::{Capability, Component, ComponentKind, HealthState};
use crate::error::OrchestratorResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw registry record for one component, as returned by discovery.
///
/// Capability entries may be bare names; the catalog upgrades them into full
/// schemas via a capability fetch, falling back to what the record carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: ComponentKind,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub health: HealthState,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl ComponentRecord {
    /// Synthesize a catalog entry directly from the registry record.
    pub fn into_component(self) -> Component {
        Component {
            id: self.id,
            name: self.name,
            kind: self.kind,
            address: self.address,
            port: self.port,
            health: self.health,
            capabilities: self.capabilities,
        }
    }
}

/// Kernel contract for the component discovery backend.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// All records whose component name matches.
    async fn find_by_name(&self, name: &str) -> OrchestratorResult<Vec<ComponentRecord>>;

    /// All records advertising the given capability name.
    async fn find_by_capability(
        &self,
        capability: &str,
    ) -> OrchestratorResult<Vec<ComponentRecord>>;

    /// Every record the registry currently knows.  Default implementations
    /// may approximate this via `find_by_name("")` when the backend has no
    /// native listing.
    async fn list_all(&self) -> OrchestratorResult<Vec<ComponentRecord>>;
}
