//! Pull-request triage: deterministic status and blocker rules, model-backed
//! feedback judgment, and the bounded resolution loop.

pub mod analyzer;
pub mod blockers;
pub mod engine;
pub mod executor;
pub mod types;

pub use analyzer::{classify_by_keywords, minimal_summary, Analyzer};
pub use blockers::{determine_status, identify_blockers, next_actions};
pub use engine::{ResolutionReport, ResolveOptions, TriageEngine, TriageError};
pub use executor::{fix_instructions, AgentFixExecutor, FixAttempt, FixChannel, FixExecutor, FixRequest};
pub use types::{
    Blocker, BlockerKind, CiStatus, FeedbackItem, FeedbackStatus, FeedbackSummary, NextAction,
    PrStatus, Priority, Severity, Task, TaskStatus, TriageResult, WorkAnalysis,
};
