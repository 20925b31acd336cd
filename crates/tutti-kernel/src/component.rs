//! Component and capability model — kernel contract.
//!
//! A *component* is a network-addressable unit (tool or agent) discovered at
//! runtime, exposing one or more typed *capabilities*.  These types are the
//! single kernel-level description of what the orchestrator can invoke;
//! concrete discovery backends live outside the kernel.

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Component kind
// ─────────────────────────────────────────────────────────────────────────────

/// Classifies what *type* of provider a component represents.
///
/// A tool is passive; an agent may itself call other components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ComponentKind {
    #[default]
    Tool,
    Agent,
}

// ─────────────────────────────────────────────────────────────────────────────
// Health state
// ─────────────────────────────────────────────────────────────────────────────

/// Last-known health state of a component, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum HealthState {
    /// Component is responding normally.
    Healthy,
    /// Component is responding but with elevated latency or partial errors.
    Degraded,
    /// Health has not yet been observed since registration.
    #[default]
    Unknown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter schema
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar/compound type of a capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// Whether a JSON value already has this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            // serde_json keeps 2.0 as f64; an integer target requires i64/u64
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

/// One typed parameter in a capability schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl CapabilityParameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: String::new(),
        }
    }

    /// Builder: mark the parameter required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: attach a human-readable description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability
// ─────────────────────────────────────────────────────────────────────────────

/// A named, typed operation exposed by a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Explicit invocation path; derived from the name when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub parameters: Vec<CapabilityParameter>,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            endpoint: None,
            parameters: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_parameter(mut self, param: CapabilityParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Invocation path relative to the component's base address.
    pub fn invocation_path(&self) -> String {
        match &self.endpoint {
            Some(ep) => ep.trim_start_matches('/').to_string(),
            None => format!("api/capabilities/{}", self.name),
        }
    }

    /// Parameters that the schema marks required.
    pub fn required_parameters(&self) -> impl Iterator<Item = &CapabilityParameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// Look up a parameter definition by name.
    pub fn parameter(&self, name: &str) -> Option<&CapabilityParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Component
// ─────────────────────────────────────────────────────────────────────────────

/// Full description of a component known to the catalog.
///
/// All components have a unique `id`.  The ordered `capabilities` list drives
/// capability lookup: the first match by name wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Unique stable identifier (must not be empty).
    pub id: String,
    pub name: String,
    pub kind: ComponentKind,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub health: HealthState,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Component {
    /// Construct a minimal component record.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ComponentKind::Tool,
            address: address.into(),
            port,
            health: HealthState::Unknown,
            capabilities: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// First capability whose name matches.
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Base URL for capability invocation.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Full invocation URL for a capability.
    pub fn invocation_url(&self, capability: &Capability) -> String {
        format!("{}/{}", self.base_url(), capability.invocation_path())
    }

    /// Basic sanity checks run before a component enters the catalog.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.id.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(
                "component id cannot be empty".to_string(),
            ));
        }
        if self.address.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(format!(
                "component '{}' has an empty address",
                self.id
            )));
        }
        Ok(())
    }
}
