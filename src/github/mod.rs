pub mod client;
pub mod errors;
pub mod types;

pub use client::{CodeHost, OctocrabHost};
pub use errors::GitHubError;
pub use types::{
    CheckState, CiCheck, FeedbackSource, IssueRef, MergeMethod, MergeOutcome, MergeRequest,
    PrState, PullRequestInfo, RawFeedback,
};
