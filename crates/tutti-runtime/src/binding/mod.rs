//! 参数绑定管线
//! Parameter binding pipeline
//!
//! 模板插值 → 自动装配 → 微解析 → 类型转换
//! Template interpolation → auto-wiring → micro-resolution → type coercion

pub mod autowire;
pub mod coerce;
pub mod hybrid;
pub mod micro;
pub mod template;

pub use autowire::{WireOutcome, auto_wire};
pub use coerce::{CoerceOutcome, coerce, coerce_map};
pub use hybrid::{HybridResolver, merge_dependency_outputs};
pub use micro::MicroResolver;
pub use template::{TemplateMiss, TemplateOutcome, interpolate};
