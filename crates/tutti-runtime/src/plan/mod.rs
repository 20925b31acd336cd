//! 计划解析与校验
//! Plan parsing and validation
//!
//! 从含噪模型输出恢复 JSON → 解析为路由计划 → 对照目录校验
//! Recover JSON from noisy model output → parse into a routing plan →
//! validate against the catalog

pub mod extract;
pub mod parser;
pub mod validate;

pub use extract::{clean_markdown_in_strings, extract_json_object, find_json_end, strip_code_fences};
pub use parser::{PlanParser, parse_plan};
pub use validate::{generate_validated, validate_plan};
