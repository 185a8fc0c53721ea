//! Agent-execution service abstraction.
//!
//! Everything the coordinator needs from the remote service goes through
//! [`AgentService`], so the coordination logic is testable without network
//! access and every call returns a uniform `Result`.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Agent, Conversation, Repository, SpawnSpec};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentServiceError {
    #[error("agent {id} not found")]
    NotFound { id: String },
    #[error("agent service rejected the API key")]
    Unauthorized,
    #[error("agent service rate limit exceeded")]
    RateLimited,
    #[error("agent service request '{operation}' timed out")]
    Timeout { operation: String },
    #[error("agent service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error talking to agent service: {0}")]
    Network(String),
    #[error("unexpected agent service response: {0}")]
    Decode(String),
    #[error("agent service is not configured: {0}")]
    NotConfigured(String),
}

impl AgentServiceError {
    /// Whether a later retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentServiceError::RateLimited
            | AgentServiceError::Timeout { .. }
            | AgentServiceError::Network(_) => true,
            AgentServiceError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait AgentService: Send + Sync {
    /// Launch a new agent.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Agent, AgentServiceError>;

    /// Current state of one agent.
    async fn status(&self, id: &str) -> Result<Agent, AgentServiceError>;

    /// All agents visible to the API key.
    async fn list(&self) -> Result<Vec<Agent>, AgentServiceError>;

    /// Transcript snapshot.
    async fn conversation(&self, id: &str) -> Result<Conversation, AgentServiceError>;

    /// Post a follow-up instruction to a running agent.
    async fn followup(&self, id: &str, text: &str) -> Result<(), AgentServiceError>;

    /// Repositories the service can run against.
    async fn repositories(&self) -> Result<Vec<Repository>, AgentServiceError>;

    /// Model identifiers the service accepts.
    async fn models(&self) -> Result<Vec<String>, AgentServiceError>;
}
