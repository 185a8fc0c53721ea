use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::github::{MergeMethod, MergeOutcome};
use crate::triage::Task;

/// Work state handed from a predecessor agent to its successor. Written once
/// per handoff and never mutated; a new handoff produces a new context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffContext {
    pub predecessor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_pr: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_branch: Option<String>,
    pub repository: String,
    pub handoff_time: DateTime<Utc>,
    #[serde(default)]
    pub completed_work: Vec<Task>,
    #[serde(default)]
    pub outstanding_tasks: Vec<Task>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

/// Caller-side knobs for starting a handoff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffOptions {
    /// Overrides the predecessor's own repository.
    pub repository: Option<String>,
    /// Used when conversation analysis fails.
    pub fallback_tasks: Vec<Task>,
    pub model: Option<String>,
    /// Return right after spawning instead of waiting for the marker.
    pub skip_health_wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TakeoverOptions {
    pub merge_method: MergeMethod,
    /// Merge directly, bypassing branch protection.
    pub admin: bool,
    /// Enable the platform's auto-merge instead of merging now.
    pub auto: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPhase {
    Initiated,
    SuccessorSpawned,
    HealthConfirmed,
    TakeoverComplete,
    Failed,
}

impl fmt::Display for HandoffPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandoffPhase::Initiated => "initiated",
            HandoffPhase::SuccessorSpawned => "successor_spawned",
            HandoffPhase::HealthConfirmed => "health_confirmed",
            HandoffPhase::TakeoverComplete => "takeover_complete",
            HandoffPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of `initiate_handoff` / `resume_handoff`.
#[derive(Debug, Clone, Serialize)]
pub struct HandoffOutcome {
    pub success: bool,
    pub phase: HandoffPhase,
    pub predecessor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successor_id: Option<String>,
    pub context: HandoffContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeoverReport {
    pub success: bool,
    pub phase: HandoffPhase,
    pub predecessor_id: String,
    pub predecessor_pr: u64,
    pub new_branch: String,
    pub merge: MergeOutcome,
}
