//! 多级错误恢复
//! Multi-stage error recovery
//!
//! 类型错误识别 → 错误分析 → 上下文重解析
//! Type-error recognition → error analysis → contextual re-resolution
//!
//! Each recovery layer draws from its own budget so a pathology in one
//! cannot starve the others.

pub mod analyzer;
pub mod patterns;
pub mod reresolver;

pub use analyzer::{ErrorAnalyzer, InvocationFailure, RetryDecision};
pub use patterns::is_type_error;
pub use reresolver::ContextualReresolver;
