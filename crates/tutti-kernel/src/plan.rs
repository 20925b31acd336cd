//! 路由计划模型
//! Routing plan model
//!
//! 定义由模型生成、由调度器执行的步骤 DAG
//! Defines the step DAG generated by the model and executed by the scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// 单步元数据：目标能力与参数映射
/// Per-step metadata: target capability and parameter mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    #[serde(default)]
    pub capability: String,
    /// 参数名到值的映射；值可含模板标记 `{{step-id.response.path}}`
    /// Name-to-value mapping; values may contain `{{step-id.response.path}}` tokens
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// 路由步骤：对某个组件能力的一次调用
/// Routing step: one invocation of a component capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingStep {
    /// 计划内唯一的步骤 ID
    /// Step ID unique within the plan
    pub step_id: String,
    pub component_name: String,
    /// 自由文本指令
    /// Free-text instruction
    #[serde(default)]
    pub instruction: String,
    /// 必须先完成的步骤 ID 列表
    /// Step IDs that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub metadata: StepMetadata,
}

impl RoutingStep {
    pub fn new(step_id: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            component_name: component_name.into(),
            instruction: String::new(),
            depends_on: Vec::new(),
            metadata: StepMetadata::default(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.metadata.capability = capability.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.metadata.parameters.insert(name.into(), value);
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// 没有依赖的步骤位于第 0 层
    /// Steps without dependencies sit at level 0
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// 路由计划：一次请求派生出的步骤 DAG
/// Routing plan: the step DAG derived from one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub plan_id: String,
    pub original_request: String,
    pub steps: Vec<RoutingStep>,
    pub created_at: DateTime<Utc>,
}

impl RoutingPlan {
    pub fn new(original_request: impl Into<String>) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            original_request: original_request.into(),
            steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn add_step(mut self, step: RoutingStep) -> Self {
        self.steps.push(step);
        self
    }

    /// 按 ID 查找步骤
    /// Find a step by ID
    pub fn step(&self, step_id: &str) -> Option<&RoutingStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut RoutingStep> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// 所有 depends_on 引用是否都指向计划内的步骤
    /// Whether every depends_on reference points at a step in the plan
    pub fn dependencies_resolve(&self) -> Result<(), String> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dep
                    ));
                }
            }
        }
        Ok(())
    }

    /// 步骤图是否无环（Kahn 算法）
    /// Whether the step graph is acyclic (Kahn's algorithm)
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: BTreeMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.depends_on.len()))
            .collect();
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop() {
            visited += 1;
            for step in &self.steps {
                if step.depends_on.iter().any(|d| d == id) {
                    let degree = in_degree.get_mut(step.step_id.as_str()).expect("known id");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(step.step_id.as_str());
                    }
                }
            }
        }

        visited == self.steps.len()
    }
}

/// 单步执行结果
/// Result of executing a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub component_name: String,
    pub success: bool,
    /// 序列化的 JSON 响应正文
    /// Serialized JSON response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration: Duration,
}

impl StepResult {
    pub fn success(
        step_id: impl Into<String>,
        component_name: impl Into<String>,
        response: String,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            component_name: component_name.into(),
            success: true,
            response: Some(response),
            error: None,
            attempts,
            status_code: Some(200),
            duration,
        }
    }

    pub fn failure(
        step_id: impl Into<String>,
        component_name: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            component_name: component_name.into(),
            success: false,
            response: None,
            error: Some(error.into()),
            attempts,
            status_code: None,
            duration,
        }
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// 解析响应正文为 JSON；失败步骤返回 None
    /// Parse the response body as JSON; None for failed steps
    pub fn response_json(&self) -> Option<Value> {
        self.response
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
    }
}

/// 整个计划的执行结果
/// Execution result for the whole plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    /// 按计划顺序排列，与完成顺序无关
    /// In plan order, regardless of completion order
    pub steps: Vec<StepResult>,
    /// 所有步骤都成功时为 true
    /// True iff every step succeeded
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    /// 部分结果：执行在检查点处挂起
    /// Partial result: execution suspended at a checkpoint
    #[serde(default)]
    pub interrupted: bool,
}

impl ExecutionResult {
    /// Aggregate step results in plan order.  `success = AND(step.success)`.
    pub fn from_steps(plan_id: impl Into<String>, steps: Vec<StepResult>) -> Self {
        let success = !steps.is_empty() && steps.iter().all(|s| s.success);
        let errors = steps
            .iter()
            .filter_map(|s| {
                s.error
                    .as_ref()
                    .map(|e| format!("{}: {}", s.step_id, e))
            })
            .collect();
        Self {
            plan_id: plan_id.into(),
            steps,
            success,
            errors,
            interrupted: false,
        }
    }

    pub fn interrupted(mut self) -> Self {
        self.interrupted = true;
        self.success = false;
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}
