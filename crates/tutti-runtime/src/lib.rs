// component catalog (组件目录)
pub mod catalog;

// parameter binding pipeline (参数绑定管线)
pub mod binding;

// multi-stage error recovery (多级错误恢复)
pub mod recovery;

// step executor
pub mod executor;

// DAG scheduler
pub mod scheduler;

// plan parsing and validation
pub mod plan;

// execution history ring buffer
pub mod history;

// routing-decision cache
pub mod cache;

// metrics collection
pub mod metrics;

// orchestrator facade
pub mod orchestrator;

pub use catalog::ComponentCatalog;
pub use executor::{CorrectionCallback, StepExecutor};
pub use orchestrator::{CapabilitySelector, Orchestrator, OrchestratorResponse, Synthesizer};
pub use scheduler::{InterruptGate, PlanScheduler};
