// component and capability model
pub mod component;

// discovery contract
pub mod discovery;

// routing plan model
pub mod plan;

// LLM provider contract
pub mod llm;

// checkpoint model and store contract (检查点模型与存储契约)
pub mod checkpoint;

// execution context
pub mod context;

// error module
pub mod error;

// Unified Configuration System (统一配置系统)
pub mod config;

pub use context::ExecutionContext;
pub use error::{OrchestratorError, OrchestratorResult};
