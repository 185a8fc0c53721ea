use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::coordinator::FleetError;

/// Lifecycle status as reported by the agent-execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[serde(alias = "CREATING")]
    Pending,
    Running,
    Completed,
    Finished,
    #[serde(alias = "ERROR", alias = "EXPIRED")]
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Completed
                | AgentStatus::Finished
                | AgentStatus::Failed
                | AgentStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, AgentStatus::Pending | AgentStatus::Running)
    }

    pub fn is_success(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Finished)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSource {
    pub repository: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AgentTarget {
    /// PR number, falling back to the trailing path segment of the PR URL.
    pub fn pull_request_number(&self) -> Option<u64> {
        self.pr_number.or_else(|| {
            self.pr_url
                .as_deref()?
                .trim_end_matches('/')
                .rsplit('/')
                .next()?
                .parse()
                .ok()
        })
    }
}

/// A remote agent execution. Only the service mutates it; we re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: AgentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AgentTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Placeholder for an id the service does not know about yet.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Unknown,
            name: None,
            source: AgentSource {
                repository: String::new(),
                git_ref: None,
            },
            target: None,
            summary: None,
            error: None,
            created_at: None,
        }
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.target.as_ref()?.pull_request_number()
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.target.as_ref()?.branch_name.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "user_message", alias = "user")]
    User,
    #[serde(rename = "assistant_message", alias = "assistant")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Read-only transcript snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "id")]
    pub agent_id: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    /// Plain transcript for prompts.
    pub fn transcript(&self, max_chars: usize) -> String {
        let mut rendered: Vec<String> = self
            .messages
            .iter()
            .map(|message| {
                let who = match message.kind {
                    MessageKind::User => "USER",
                    MessageKind::Assistant => "ASSISTANT",
                };
                format!("[{who}] {}", message.text.trim())
            })
            .collect();

        // Keep the tail; the most recent exchange matters most.
        let mut total: usize = rendered.iter().map(|line| line.len() + 2).sum();
        while total > max_chars && rendered.len() > 1 {
            total -= rendered[0].len() + 2;
            rendered.remove(0);
        }
        rendered.join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Everything needed to spawn one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub prompt: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default = "default_auto_create_pr")]
    pub auto_create_pr: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_auto_create_pr() -> bool {
    true
}

impl SpawnSpec {
    pub fn new(repository: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            repository: repository.into(),
            git_ref: None,
            branch_name: None,
            auto_create_pr: true,
            model: None,
        }
    }

    pub fn on_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = Some(branch.into());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Fan-out to target repositories, fan-in through one counterparty agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiamondPlan {
    pub target_repos: Vec<SpawnSpec>,
    pub counterparty: SpawnSpec,
    /// Repository whose PR comments carry coordination traffic.
    pub control_center: String,
}

#[derive(Debug)]
pub struct DiamondOutcome {
    /// One entry per target spec, in plan order.
    pub target_agents: Vec<(String, Result<Agent, FleetError>)>,
    pub counterparty_agent: Result<Agent, FleetError>,
}

impl DiamondOutcome {
    pub fn spawned_ids(&self) -> Vec<String> {
        self.target_agents
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok())
            .chain(self.counterparty_agent.as_ref().ok())
            .map(|agent| agent.id.clone())
            .collect()
    }
}

/// Per-id results of a broadcast or a fan-in wait.
pub type FleetResults<T> = BTreeMap<String, Result<T, FleetError>>;
