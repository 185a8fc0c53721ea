use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::github::{CheckState, CiCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    NeedsWork,
    NeedsReview,
    NeedsCi,
    ReadyToMerge,
    Blocked,
    Merged,
    Closed,
}

impl fmt::Display for PrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrStatus::NeedsWork => "needs_work",
            PrStatus::NeedsReview => "needs_review",
            PrStatus::NeedsCi => "needs_ci",
            PrStatus::ReadyToMerge => "ready_to_merge",
            PrStatus::Blocked => "blocked",
            PrStatus::Merged => "merged",
            PrStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// CI checks for the PR head with pre-computed counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiStatus {
    pub checks: Vec<CiCheck>,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
}

impl CiStatus {
    pub fn from_checks(checks: Vec<CiCheck>) -> Self {
        let count = |state: CheckState| checks.iter().filter(|c| c.state == state).count();
        let passed = count(CheckState::Success) + count(CheckState::Neutral);
        let failed = count(CheckState::Failure);
        let pending = count(CheckState::Pending);
        Self {
            checks,
            passed,
            failed,
            pending,
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CiCheck> {
        self.checks.iter().filter(|c| c.state == CheckState::Failure)
    }

    /// At least one check ran and none failed or is still running.
    pub fn all_passing(&self) -> bool {
        !self.checks.is_empty() && self.failed == 0 && self.pending == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Unaddressed,
    Addressed,
    Dismissed,
    WontFix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: String,
    pub author: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub severity: Severity,
    pub status: FeedbackStatus,
    pub is_auto_resolvable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl FeedbackItem {
    pub fn is_unaddressed(&self) -> bool {
        self.status == FeedbackStatus::Unaddressed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub total: usize,
    pub unaddressed: usize,
    pub items: Vec<FeedbackItem>,
}

impl FeedbackSummary {
    pub fn new(items: Vec<FeedbackItem>) -> Self {
        Self {
            total: items.len(),
            unaddressed: items.iter().filter(|i| i.is_unaddressed()).count(),
            items,
        }
    }

    pub fn unaddressed_items(&self) -> impl Iterator<Item = &FeedbackItem> {
        self.items.iter().filter(|i| i.is_unaddressed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    CiFailure,
    ReviewFeedback,
    MergeConflict,
    BranchProtection,
}

impl fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockerKind::CiFailure => "ci_failure",
            BlockerKind::ReviewFeedback => "review_feedback",
            BlockerKind::MergeConflict => "merge_conflict",
            BlockerKind::BranchProtection => "branch_protection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub kind: BlockerKind,
    pub description: String,
    pub is_auto_resolvable: bool,
    /// Check names or feedback ids this blocker stands for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextAction {
    FixCiFailure { check: String },
    AddressFeedback { items: Vec<String> },
    ResolveMergeConflict,
    SatisfyBranchProtection,
    WaitForCi,
    RequestReview,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageResult {
    pub repository: String,
    pub pr_number: u64,
    pub pr_url: String,
    pub head_branch: String,
    pub head_sha: String,
    pub status: PrStatus,
    pub ci: CiStatus,
    pub feedback: FeedbackSummary,
    pub blockers: Vec<Blocker>,
    pub next_actions: Vec<NextAction>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl TriageResult {
    /// True when every blocker needs a human.
    pub fn only_human_blockers(&self) -> bool {
        !self.blockers.is_empty() && self.blockers.iter().all(|b| !b.is_auto_resolvable)
    }

    /// Something the executor could act on.
    pub fn has_fixable_work(&self) -> bool {
        self.blockers.iter().any(|b| b.is_auto_resolvable) || self.feedback.unaddressed > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[serde(alias = "normal")]
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    InProgress,
    Pending,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    #[serde(default = "default_category")]
    pub category: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            priority: Priority::Medium,
            category: default_category(),
            status,
            blockers: Vec::new(),
        }
    }
}

/// Work state derived from an agent's conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkAnalysis {
    pub completed: Vec<Task>,
    pub outstanding: Vec<Task>,
    pub decisions: Vec<String>,
    pub summary: String,
}
