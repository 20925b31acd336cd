//! LLM contract — kernel abstraction over model providers.
//!
//! The orchestration layer consults a model in four places: plan generation,
//! parameter micro-resolution, error analysis, and contextual re-resolution.
//! All four go through [`LLMProvider`]; concrete clients live outside the
//! kernel.

pub mod provider;
pub mod types;

pub use provider::{CompletionStream, LLMProvider};
pub use types::*;
