//! 人工指令
//! Human commands
//!
//! Wire types for the command half of the two-phase HITL API: a command is
//! accepted (fast, returns [`ResumeResult`]) and the caller separately asks
//! for the resume (slow, runs the rest of the plan).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tutti_kernel::checkpoint::ExecutionCheckpoint;
use tutti_kernel::plan::RoutingPlan;

/// One human decision about a pending checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HitlCommand {
    /// Resume as-is.
    Approve,
    /// Overwrite the plan and/or the current step's parameters, then resume.
    Edit {
        #[serde(skip_serializing_if = "Option::is_none")]
        plan: Option<RoutingPlan>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<BTreeMap<String, Value>>,
    },
    /// Terminate with an explanatory response.
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Approve, but mark the current step skipped.
    Skip,
    /// Terminate immediately.
    Abort,
    /// Re-run the current step without change.
    Retry,
    /// Append a human response and continue.
    Respond { message: String },
}

/// Body of `POST /hitl/command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub checkpoint_id: String,
    #[serde(flatten)]
    pub command: HitlCommand,
}

/// Outcome of command acceptance.
///
/// `should_resume` tells the caller whether a follow-up
/// `POST /hitl/resume/{checkpoint_id}` will continue execution; terminal
/// commands (reject, abort) come back with `should_resume = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeResult {
    pub should_resume: bool,
    pub checkpoint: ExecutionCheckpoint,
}
