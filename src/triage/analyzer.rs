//! Model-backed judgment: feedback classification, work extraction from a
//! conversation and narrative summaries. Each call degrades to a
//! deterministic fallback when the model is unavailable.

use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    FeedbackItem, FeedbackStatus, Severity, TriageResult, WorkAnalysis,
};
use crate::fleet::Conversation;
use crate::github::RawFeedback;
use crate::llm::{LlmError, OutputSchema, StructuredGenerator};

const TRANSCRIPT_BUDGET: usize = 60_000;

#[derive(Deserialize)]
struct Classification {
    id: String,
    severity: Severity,
    status: FeedbackStatus,
    is_auto_resolvable: bool,
    #[serde(default)]
    suggested_action: Option<String>,
}

#[derive(Deserialize)]
struct ClassificationBatch {
    #[serde(default)]
    items: Vec<Classification>,
}

#[derive(Clone, Default)]
pub struct Analyzer {
    generator: Option<Arc<dyn StructuredGenerator>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("model", &self.generator.as_ref().map(|g| g.model().to_string()))
            .finish()
    }
}

impl Analyzer {
    pub fn new(generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// Keyword classification and minimal summaries only.
    pub fn offline() -> Self {
        Self { generator: None }
    }

    fn generator(&self) -> Result<&Arc<dyn StructuredGenerator>, LlmError> {
        self.generator.as_ref().ok_or_else(|| LlmError::Provider {
            provider: "none".to_string(),
            message: "no model configured".to_string(),
        })
    }

    /// Classify every raw item. Items the model skips or when the model call
    /// fails are classified by keyword.
    pub async fn classify_feedback(&self, raw: &[RawFeedback]) -> Vec<FeedbackItem> {
        if raw.is_empty() {
            return Vec::new();
        }

        let mut verdicts = match self.classify_with_model(raw).await {
            Ok(batch) => batch
                .items
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect::<HashMap<_, _>>(),
            Err(e) => {
                warn!(error = %e, "feedback classification fell back to keywords");
                HashMap::new()
            }
        };

        raw.iter()
            .map(|item| match verdicts.remove(&item.id) {
                Some(verdict) => FeedbackItem {
                    id: item.id.clone(),
                    author: item.author.clone(),
                    body: item.body.clone(),
                    path: item.path.clone(),
                    line: item.line,
                    severity: verdict.severity,
                    status: verdict.status,
                    is_auto_resolvable: verdict.is_auto_resolvable,
                    suggested_action: verdict.suggested_action,
                },
                None => classify_by_keywords(item),
            })
            .collect()
    }

    async fn classify_with_model(&self, raw: &[RawFeedback]) -> Result<ClassificationBatch, LlmError> {
        let generator = self.generator()?;
        let comments: Vec<_> = raw
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "author": item.author,
                    "path": item.path,
                    "line": item.line,
                    "body": item.body,
                })
            })
            .collect();
        let prompt = format!(
            "Classify each pull-request review comment below.\n\
             severity: critical (security, data loss, crash), high (bugs, broken behavior), \
             medium (should fix), low (style, nits), info (no action).\n\
             status: unaddressed unless the thread shows it was fixed, dismissed or declined.\n\
             is_auto_resolvable: true when a coding agent can fix it without a human decision.\n\n\
             Comments:\n{}",
            serde_json::to_string_pretty(&comments).unwrap_or_default()
        );

        let value = generator.generate_structured(&prompt, &classification_schema()).await?;
        serde_json::from_value(value).map_err(|e| LlmError::InvalidOutput(e.to_string()))
    }

    /// Completed work, outstanding tasks and decisions from a transcript.
    pub async fn extract_work(&self, conversation: &Conversation) -> Result<WorkAnalysis, LlmError> {
        let generator = self.generator()?;
        let prompt = format!(
            "Below is the transcript of a coding agent working on a task. Extract the work it \
             completed, the tasks still outstanding (with priority and any blockers), the \
             design decisions it made, and a short summary of where things stand.\n\n{}",
            conversation.transcript(TRANSCRIPT_BUDGET)
        );
        let value = generator.generate_structured(&prompt, &work_schema()).await?;
        let analysis: WorkAnalysis =
            serde_json::from_value(value).map_err(|e| LlmError::InvalidOutput(e.to_string()))?;
        debug!(
            agent_id = %conversation.agent_id,
            completed = analysis.completed.len(),
            outstanding = analysis.outstanding.len(),
            "extracted work state"
        );
        Ok(analysis)
    }

    /// Narrative summary of a triage pass. Never fails.
    pub async fn summarize(&self, triage: &TriageResult) -> String {
        let fallback = minimal_summary(triage);
        let Ok(generator) = self.generator() else {
            return fallback;
        };

        let prompt = format!(
            "Write a two or three sentence status summary for pull request #{} ({}). \
             Facts:\n{}\n\nDeterministic status: {}",
            triage.pr_number,
            triage.pr_url,
            serde_json::to_string_pretty(&json!({
                "blockers": triage.blockers,
                "next_actions": triage.next_actions,
                "ci": {"passed": triage.ci.passed, "failed": triage.ci.failed, "pending": triage.ci.pending},
                "unaddressed_feedback": triage.feedback.unaddressed,
            }))
            .unwrap_or_default(),
            triage.status
        );
        let schema = OutputSchema::new(
            "pr_summary",
            "Short human-readable summary of a pull request's readiness",
            json!({
                "type": "object",
                "properties": { "summary": { "type": "string" } },
                "required": ["summary"]
            }),
        );

        match generator.generate_structured(&prompt, &schema).await {
            Ok(value) => value["summary"]
                .as_str()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .unwrap_or(fallback),
            Err(e) => {
                debug!(error = %e, "summary fell back to minimal message");
                fallback
            }
        }
    }
}

pub fn minimal_summary(triage: &TriageResult) -> String {
    format!(
        "PR #{} is {}: {} blocker(s), {} unaddressed feedback item(s), CI {}/{} passing{}",
        triage.pr_number,
        triage.status,
        triage.blockers.len(),
        triage.feedback.unaddressed,
        triage.ci.passed,
        triage.ci.checks.len(),
        if triage.ci.pending > 0 {
            format!(", {} pending", triage.ci.pending)
        } else {
            String::new()
        }
    )
}

const CRITICAL_KEYWORDS: &[&str] = &[
    "security", "vulnerability", "injection", "data loss", "crash", "panic", "critical",
    "memory leak", "unsafe",
];
const HIGH_KEYWORDS: &[&str] = &[
    "bug", "error", "incorrect", "broken", "fails", "failing", "must", "breaking change",
    "race condition", "null pointer", "regression",
];
const MEDIUM_KEYWORDS: &[&str] = &[
    "should", "needs to", "required", "recommend", "performance", "refactor", "missing test",
    "compatibility",
];
const LOW_KEYWORDS: &[&str] = &[
    "nit", "style", "formatting", "naming", "typo", "consider", "might", "could", "minor",
    "readability", "documentation",
];
const HUMAN_KEYWORDS: &[&str] = &[
    "discuss", "design decision", "architecture", "product", "approval", "not sure we want",
];

/// Keyword classification used when the model is unavailable.
pub fn classify_by_keywords(raw: &RawFeedback) -> FeedbackItem {
    let body = raw.body.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| body.contains(w));

    let severity = if has(CRITICAL_KEYWORDS) {
        Severity::Critical
    } else if has(HIGH_KEYWORDS) {
        Severity::High
    } else if has(MEDIUM_KEYWORDS) {
        Severity::Medium
    } else if has(LOW_KEYWORDS) {
        Severity::Low
    } else {
        Severity::Info
    };

    FeedbackItem {
        id: raw.id.clone(),
        author: raw.author.clone(),
        body: raw.body.clone(),
        path: raw.path.clone(),
        line: raw.line,
        severity,
        status: if severity == Severity::Info {
            FeedbackStatus::Dismissed
        } else {
            FeedbackStatus::Unaddressed
        },
        is_auto_resolvable: !has(HUMAN_KEYWORDS),
        suggested_action: None,
    }
}

fn classification_schema() -> OutputSchema {
    OutputSchema::new(
        "classify_feedback",
        "Classify pull-request review feedback",
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "severity": { "enum": ["critical", "high", "medium", "low", "info"] },
                            "status": { "enum": ["unaddressed", "addressed", "dismissed", "wont_fix"] },
                            "is_auto_resolvable": { "type": "boolean" },
                            "suggested_action": { "type": "string" }
                        },
                        "required": ["id", "severity", "status", "is_auto_resolvable"]
                    }
                }
            },
            "required": ["items"]
        }),
    )
}

fn work_schema() -> OutputSchema {
    let task = json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "title": { "type": "string" },
            "description": { "type": "string" },
            "priority": { "enum": ["critical", "high", "medium", "low", "info"] },
            "category": { "type": "string" },
            "status": { "enum": ["completed", "in_progress", "pending", "blocked"] },
            "blockers": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["id", "title", "priority", "status"]
    });
    OutputSchema::new(
        "extract_work",
        "Work state of a coding agent",
        json!({
            "type": "object",
            "properties": {
                "completed": { "type": "array", "items": task.clone() },
                "outstanding": { "type": "array", "items": task },
                "decisions": { "type": "array", "items": { "type": "string" } },
                "summary": { "type": "string" }
            },
            "required": ["completed", "outstanding", "decisions", "summary"]
        }),
    )
}
