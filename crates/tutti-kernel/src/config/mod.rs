//! 统一配置系统
//! Unified configuration system
//!
//! Every tunable of the execution engine lives here with its default.  The
//! structs are plain serde types so they can come from any source; the
//! optional `loader` module (behind the `config` feature) adds multi-format
//! file loading with environment variable substitution.

use crate::checkpoint::InterruptPoint;
use crate::error::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[cfg(feature = "config")]
pub mod loader;

/// 语义重试配置
/// Semantic retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    /// HTTP 状态码触发语义重试
    /// HTTP status codes that trigger semantic retry
    pub trigger_status_codes: HashSet<u16>,
}

impl Default for SemanticRetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 2,
            trigger_status_codes: [400, 422].into_iter().collect(),
        }
    }
}

/// 过期处理策略：检查点超时后的隐式决定
/// Timeout policy: the implicit decision applied to an expired checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    ImplicitApprove,
    #[default]
    ImplicitReject,
    ImplicitAbort,
    /// Deny without the rejection semantics: plain `expired`.
    ImplicitDeny,
}

/// 过期回调投递语义
/// Delivery semantics for expiry callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliverySemantics {
    /// Do not retry if the callback panics.
    #[default]
    AtMostOnce,
    /// Re-queue the checkpoint on callback panic.
    AtLeastOnce,
}

/// 过期扫描配置
/// Expiry sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// 扫描周期，不低于 1 秒
    /// Sweep tick, floor 1s
    #[serde(with = "duration_secs")]
    pub scan_interval: Duration,
    /// 单次扫描处理上限，不超过 10000
    /// Per-tick work cap, ceiling 10000
    pub batch_size: usize,
    pub delivery_semantics: DeliverySemantics,
    pub timeout_policy: TimeoutPolicy,
    /// 认领租约时长
    /// Claim lease duration
    #[serde(with = "duration_secs")]
    pub claim_lease: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            batch_size: 100,
            delivery_semantics: DeliverySemantics::default(),
            timeout_policy: TimeoutPolicy::default(),
            claim_lease: Duration::from_secs(30),
        }
    }
}

/// HITL 配置
/// HITL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlConfig {
    pub enabled: bool,
    /// 激活的中断点集合
    /// Active interrupt points
    pub interrupt_points: HashSet<InterruptPoint>,
    /// 等待人工响应的窗口，即 pending 检查点的 TTL
    /// Human-response window; the TTL of a pending checkpoint
    #[serde(with = "duration_secs")]
    pub wait_window: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub expiry: ExpiryConfig,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interrupt_points: HashSet::new(),
            wait_window: Duration::from_secs(300),
            webhook_url: None,
            expiry: ExpiryConfig::default(),
        }
    }
}

/// 编排引擎配置
/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// 并行步骤上限
    /// Parallel step cap
    pub max_concurrency: usize,
    /// 单步超时
    /// Per-step deadline
    #[serde(with = "duration_secs")]
    pub step_timeout: Duration,
    /// 整个计划的超时
    /// Per-plan deadline
    #[serde(with = "duration_secs")]
    pub total_timeout: Duration,
    /// 单步主重试预算
    /// Main retry budget per step
    pub retry_attempts: u32,
    /// 类型错误纠正层开关
    /// Type-error correction layer toggle
    pub validation_feedback_enabled: bool,
    /// 校验反馈独立预算
    /// Independent budget for validation feedback
    pub max_validation_retries: u32,
    pub semantic_retry: SemanticRetryConfig,
    pub plan_parse_retry_enabled: bool,
    pub plan_parse_max_retries: u32,
    pub hitl: HitlConfig,
    /// 执行历史环形缓冲容量
    /// Execution-history ring buffer capacity
    pub history_size: usize,
    /// 路由决策缓存
    /// Routing-decision cache
    pub cache_enabled: bool,
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            step_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(120),
            retry_attempts: 2,
            validation_feedback_enabled: true,
            max_validation_retries: 2,
            semantic_retry: SemanticRetryConfig::default(),
            plan_parse_retry_enabled: true,
            plan_parse_max_retries: 2,
            hitl: HitlConfig::default(),
            history_size: 100,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    /// Reject out-of-range values before the engine starts.
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::ConfigError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.hitl.expiry.scan_interval < Duration::from_secs(1) {
            return Err(OrchestratorError::ConfigError(
                "hitl.expiry.scan_interval must be at least 1s".to_string(),
            ));
        }
        if self.hitl.expiry.batch_size == 0 || self.hitl.expiry.batch_size > 10_000 {
            return Err(OrchestratorError::ConfigError(
                "hitl.expiry.batch_size must be in 1..=10000".to_string(),
            ));
        }
        if self.history_size == 0 {
            return Err(OrchestratorError::ConfigError(
                "history_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serialize durations as whole seconds — what the config files use.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_table() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.total_timeout, Duration::from_secs(120));
        assert_eq!(config.retry_attempts, 2);
        assert!(config.validation_feedback_enabled);
        assert_eq!(config.max_validation_retries, 2);
        assert!(config.semantic_retry.enabled);
        assert_eq!(config.semantic_retry.max_attempts, 2);
        assert!(config.semantic_retry.trigger_status_codes.contains(&400));
        assert!(config.semantic_retry.trigger_status_codes.contains(&422));
        assert!(config.plan_parse_retry_enabled);
        assert_eq!(config.plan_parse_max_retries, 2);
        assert!(!config.hitl.enabled);
        assert_eq!(config.hitl.expiry.scan_interval, Duration::from_secs(10));
        assert_eq!(config.hitl.expiry.batch_size, 100);
        assert_eq!(config.history_size, 100);
        assert!(config.cache_enabled);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_fast_scan() {
        let mut config = OrchestratorConfig::default();
        config.hitl.expiry.scan_interval = Duration::from_millis(200);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let mut config = OrchestratorConfig::default();
        config.hitl.expiry.batch_size = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip_json() {
        let config = OrchestratorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step_timeout, config.step_timeout);
        assert_eq!(back.hitl.expiry.batch_size, config.hitl.expiry.batch_size);
    }
}
