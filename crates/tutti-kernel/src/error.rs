//! Orchestrator 错误类型定义
//!
//! 统一的编排层错误处理
//! Unified error handling for the orchestration layer

use thiserror::Error;

/// 编排操作结果类型
/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// 编排层错误类型
/// Orchestration-layer error type
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// 网络传输失败（DNS、连接、读取）
    /// Network-level failure (DNS, connect, read)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// 非 200 响应，正文保留用于错误分类
    /// Non-200 response; body retained for error classification
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// 响应正文匹配已知类型错误模式
    /// Body matched a known type-error pattern
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// 参数装配不完整且无法修复
    /// Parameter wiring incomplete and not fixable
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// 微解析返回无效 JSON 或缺少必填字段
    /// Micro-resolution returned invalid JSON or omitted required fields
    #[error("Micro-resolution failed: {0}")]
    MicroResolutionFailed(String),

    /// 无法从模型输出恢复出计划 JSON
    /// Plan JSON could not be recovered from model output
    #[error("Plan parse failed: {0}")]
    PlanParseFailed(String),

    /// 计划引用了未知组件/能力/缺失依赖
    /// Plan references an unknown component/capability/missing dependency
    #[error("Plan invalid: {0}")]
    PlanInvalid(String),

    /// 执行在检查点处挂起 — 信号而非失败
    /// Execution suspended at a checkpoint — a signal, not a failure
    #[error("Execution interrupted at checkpoint {0}")]
    Interrupted(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Checkpoint expired: {0}")]
    CheckpointExpired(String),

    /// 检查点不在可接受命令的状态
    /// Checkpoint is not in a state that accepts the command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// 检查点存储访问失败
    /// Checkpoint storage access failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// 模型调用不可用或失败
    /// Model call unavailable or failed
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// 组件未在目录中注册
    /// Component not registered in the catalog
    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    /// 能力未在组件上声明
    /// Capability not declared on the component
    #[error("Capability not found: {component}/{capability}")]
    CapabilityNotFound { component: String, capability: String },

    /// 请求作用域被取消
    /// Request scope was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// 所有重试预算耗尽
    /// All retry budgets exhausted
    #[error("Fatal: {0}")]
    Fatal(String),

    /// 配置错误
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 序列化错误
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 其他错误
    /// Other error
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// 创建超时错误
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// 创建能力未找到错误
    pub fn capability_not_found(
        component: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self::CapabilityNotFound {
            component: component.into(),
            capability: capability.into(),
        }
    }

    /// Interrupted 是调度器的挂起信号，不计入失败
    /// Interrupted is the scheduler's suspension signal, not a failure
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// 传输层与 5xx 类错误交由外层退避重试处理
    /// Transport and 5xx-class errors are handled by the outer backoff retry
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}
