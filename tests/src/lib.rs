//! Shared fixtures for Tutti integration tests: a scripted LLM provider and
//! mock component servers backed by real listeners.

pub mod components;
pub mod llm;

pub use components::{MockComponent, catalog_of, fixed_response_component, number_param, serve, string_param};
pub use llm::MockLLMProvider;
