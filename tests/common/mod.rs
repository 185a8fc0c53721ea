//! Hand-written collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use fleet_control::fleet::{
    Agent, AgentService, AgentServiceError, AgentSource, AgentStatus, AgentTarget, Conversation,
    ConversationMessage, MessageKind, Repository, SpawnSpec,
};
use fleet_control::github::{
    CheckState, CiCheck, CodeHost, FeedbackSource, GitHubError, IssueRef, MergeOutcome,
    MergeRequest, PrState, PullRequestInfo, RawFeedback,
};
use fleet_control::handoff::{Workspace, WorkspaceError};
use fleet_control::llm::{LlmError, OutputSchema, StructuredGenerator};
use fleet_control::tokens::{
    Credential, OrganizationRoute, RepoRef, RouteTable, StaticTokenSource, TokenRouter,
};
use fleet_control::triage::{FixAttempt, FixChannel, FixExecutor, FixRequest};
use fleet_control::FleetError;

pub const REVIEW_LOGIN: &str = "fleet-reviewer";

/// Router with a default key, a review key and one routed organization
/// (`acme` -> `ACME_TOKEN`), all with values.
pub fn router() -> Arc<TokenRouter> {
    let mut table = RouteTable::new("GITHUB_TOKEN", "REVIEW_TOKEN");
    table.upsert(OrganizationRoute::new("acme", "ACME_TOKEN"));
    let source = StaticTokenSource::new()
        .with("GITHUB_TOKEN", "ghp_default")
        .with("REVIEW_TOKEN", "ghp_review")
        .with("ACME_TOKEN", "ghp_acme");
    Arc::new(TokenRouter::new(table, Arc::new(source)))
}

pub fn repo() -> RepoRef {
    RepoRef::new("acme", "widgets")
}

pub fn open_pr(number: u64) -> PullRequestInfo {
    PullRequestInfo {
        number,
        url: format!("https://github.com/acme/widgets/pull/{number}"),
        title: "Add widget export".to_string(),
        state: PrState::Open,
        merged: false,
        mergeable: Some(true),
        mergeable_state: Some("clean".to_string()),
        head_branch: "feature/export".to_string(),
        head_sha: "sha-1".to_string(),
        base_branch: "main".to_string(),
        node_id: Some("PR_node".to_string()),
        author: Some("agent-bot".to_string()),
    }
}

pub fn check(name: &str, state: CheckState) -> CiCheck {
    CiCheck {
        name: name.to_string(),
        state,
        url: None,
        summary: None,
    }
}

pub fn comment(id: &str, author: &str, body: &str) -> RawFeedback {
    RawFeedback {
        id: id.to_string(),
        author: author.to_string(),
        body: body.to_string(),
        path: None,
        line: None,
        source: FeedbackSource::IssueComment,
        created_at: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMerge {
    pub credential_key: String,
    pub number: u64,
    pub request: MergeRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedIssue {
    pub credential_key: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedComment {
    pub credential_key: String,
    pub number: u64,
    pub body: String,
}

/// Code host returning whatever state the test put in it.
pub struct MockCodeHost {
    pub pr: Mutex<PullRequestInfo>,
    pub checks: Mutex<Vec<CiCheck>>,
    pub feedback: Mutex<Vec<RawFeedback>>,
    pub merge_error: Mutex<Option<String>>,
    pub merges: Mutex<Vec<RecordedMerge>>,
    pub comments: Mutex<Vec<RecordedComment>>,
    pub issues: Mutex<Vec<RecordedIssue>>,
    pub pr_reads: AtomicU32,
    pub login_lookups: AtomicU32,
}

impl MockCodeHost {
    pub fn new(pr: PullRequestInfo) -> Arc<Self> {
        Arc::new(Self {
            pr: Mutex::new(pr),
            checks: Mutex::new(Vec::new()),
            feedback: Mutex::new(Vec::new()),
            merge_error: Mutex::new(None),
            merges: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            issues: Mutex::new(Vec::new()),
            pr_reads: AtomicU32::new(0),
            login_lookups: AtomicU32::new(0),
        })
    }

    pub fn set_checks(&self, checks: Vec<CiCheck>) {
        *self.checks.lock().unwrap() = checks;
    }

    pub fn set_feedback(&self, feedback: Vec<RawFeedback>) {
        *self.feedback.lock().unwrap() = feedback;
    }

    pub fn fail_merges(&self, message: &str) {
        *self.merge_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn update_pr(&self, update: impl FnOnce(&mut PullRequestInfo)) {
        update(&mut self.pr.lock().unwrap());
    }
}

#[async_trait]
impl CodeHost for MockCodeHost {
    async fn get_pr(
        &self,
        _credential: &Credential,
        _repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestInfo, GitHubError> {
        self.pr_reads.fetch_add(1, Ordering::SeqCst);
        let pr = self.pr.lock().unwrap().clone();
        if pr.number != number {
            return Err(GitHubError::NotFound {
                resource: format!("pull request #{number}"),
            });
        }
        Ok(pr)
    }

    async fn get_ci_status(
        &self,
        _credential: &Credential,
        _repo: &RepoRef,
        _head_sha: &str,
    ) -> Result<Vec<CiCheck>, GitHubError> {
        Ok(self.checks.lock().unwrap().clone())
    }

    async fn collect_feedback(
        &self,
        _credential: &Credential,
        _repo: &RepoRef,
        _number: u64,
    ) -> Result<Vec<RawFeedback>, GitHubError> {
        Ok(self.feedback.lock().unwrap().clone())
    }

    async fn merge_pr(
        &self,
        credential: &Credential,
        _repo: &RepoRef,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeOutcome, GitHubError> {
        if let Some(message) = self.merge_error.lock().unwrap().clone() {
            return Err(GitHubError::MergeRejected {
                pr_number: number,
                message,
            });
        }
        self.merges.lock().unwrap().push(RecordedMerge {
            credential_key: credential.key.clone(),
            number,
            request: *request,
        });
        Ok(MergeOutcome {
            merged: !request.auto,
            auto_merge_enabled: request.auto,
            sha: Some("merge-sha".to_string()),
            message: "Pull Request successfully merged".to_string(),
        })
    }

    async fn create_issue(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, GitHubError> {
        let mut issues = self.issues.lock().unwrap();
        issues.push(RecordedIssue {
            credential_key: credential.key.clone(),
            title: title.to_string(),
            body: body.to_string(),
        });
        let number = issues.len() as u64;
        Ok(IssueRef {
            number,
            url: format!("https://github.com/{}/issues/{number}", repo.slug()),
        })
    }

    async fn post_comment(
        &self,
        credential: &Credential,
        _repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        self.comments.lock().unwrap().push(RecordedComment {
            credential_key: credential.key.clone(),
            number,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn authenticated_login(&self, _credential: &Credential) -> Result<String, GitHubError> {
        self.login_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(REVIEW_LOGIN.to_string())
    }
}

pub fn agent(id: &str, status: AgentStatus, repository: &str) -> Agent {
    Agent {
        id: id.to_string(),
        status,
        name: None,
        source: AgentSource {
            repository: repository.to_string(),
            git_ref: None,
        },
        target: None,
        summary: None,
        error: None,
        created_at: None,
    }
}

pub fn with_pr(mut agent: Agent, number: u64, branch: &str) -> Agent {
    agent.target = Some(AgentTarget {
        branch_name: Some(branch.to_string()),
        pr_url: Some(format!("https://github.com/acme/widgets/pull/{number}")),
        pr_number: None,
        url: None,
    });
    agent
}

pub fn assistant(text: &str) -> ConversationMessage {
    ConversationMessage {
        kind: MessageKind::Assistant,
        text: text.to_string(),
        timestamp: None,
    }
}

/// In-memory agent service. Spawned agents get ids `spawned-1`, `spawned-2`, ...
#[derive(Default)]
pub struct MockAgentService {
    pub agents: Mutex<HashMap<String, Agent>>,
    pub conversations: Mutex<HashMap<String, Conversation>>,
    /// Conversation handed to every agent this service spawns.
    pub spawned_conversation: Mutex<Vec<ConversationMessage>>,
    pub failing_followups: Mutex<HashSet<String>>,
    pub fail_spawns: Mutex<bool>,
    pub spawns: Mutex<Vec<SpawnSpec>>,
    pub followups: Mutex<Vec<(String, String)>>,
    /// Upcoming status reads that answer HTTP 503.
    pub status_outages: AtomicU32,
    next_id: AtomicU32,
}

impl MockAgentService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, agent: Agent) {
        self.agents.lock().unwrap().insert(agent.id.clone(), agent);
    }

    pub fn set_conversation(&self, id: &str, messages: Vec<ConversationMessage>) {
        self.conversations.lock().unwrap().insert(
            id.to_string(),
            Conversation {
                agent_id: id.to_string(),
                messages,
            },
        );
    }

    pub fn fail_followups_to(&self, id: &str) {
        self.failing_followups.lock().unwrap().insert(id.to_string());
    }

    pub fn followups_to(&self, id: &str) -> Vec<String> {
        self.followups
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl AgentService for MockAgentService {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Agent, AgentServiceError> {
        if *self.fail_spawns.lock().unwrap() {
            return Err(AgentServiceError::Http {
                status: 500,
                message: "spawn rejected".to_string(),
            });
        }
        self.spawns.lock().unwrap().push(spec.clone());
        let id = format!("spawned-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = agent(&id, AgentStatus::Running, &spec.repository);
        self.insert(created.clone());
        let messages = self.spawned_conversation.lock().unwrap().clone();
        self.set_conversation(&id, messages);
        Ok(created)
    }

    async fn status(&self, id: &str) -> Result<Agent, AgentServiceError> {
        if self
            .status_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AgentServiceError::Http {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        self.agents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentServiceError::NotFound { id: id.to_string() })
    }

    async fn list(&self) -> Result<Vec<Agent>, AgentServiceError> {
        Ok(self.agents.lock().unwrap().values().cloned().collect())
    }

    async fn conversation(&self, id: &str) -> Result<Conversation, AgentServiceError> {
        self.conversations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentServiceError::NotFound { id: id.to_string() })
    }

    async fn followup(&self, id: &str, text: &str) -> Result<(), AgentServiceError> {
        if self.failing_followups.lock().unwrap().contains(id) {
            return Err(AgentServiceError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        self.followups
            .lock()
            .unwrap()
            .push((id.to_string(), text.to_string()));
        Ok(())
    }

    async fn repositories(&self) -> Result<Vec<Repository>, AgentServiceError> {
        Ok(Vec::new())
    }

    async fn models(&self) -> Result<Vec<String>, AgentServiceError> {
        Ok(vec!["default".to_string()])
    }
}

/// Generator that replays queued responses and fails once the queue is empty.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub responses: Mutex<Vec<Value>>,
    pub calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_responses(responses: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn generate_structured(
        &self,
        _prompt: &str,
        _schema: &OutputSchema,
    ) -> Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Provider {
                provider: "scripted".to_string(),
                message: "no scripted response left".to_string(),
            });
        }
        Ok(responses.remove(0))
    }
}

/// Fix executor that records requests and optionally "fixes" the PR by
/// running a callback against the mock host.
pub struct RecordingFixExecutor {
    pub requests: Mutex<Vec<FixRequest>>,
    on_fix: Box<dyn Fn() + Send + Sync>,
}

impl RecordingFixExecutor {
    pub fn new() -> Arc<Self> {
        Self::with_effect(|| {})
    }

    pub fn with_effect(on_fix: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            on_fix: Box::new(on_fix),
        })
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl FixExecutor for RecordingFixExecutor {
    async fn attempt_fix(&self, request: &FixRequest) -> Result<FixAttempt, FleetError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.on_fix)();
        Ok(FixAttempt {
            agent_id: "fixer".to_string(),
            channel: FixChannel::Followup,
        })
    }
}

/// Workspace that records calls instead of touching git.
#[derive(Default)]
pub struct RecordingWorkspace {
    pub calls: Mutex<Vec<String>>,
    pub fail_pull: Mutex<bool>,
}

impl RecordingWorkspace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Workspace for RecordingWorkspace {
    fn pull_default_branch(
        &self,
        credential: &Credential,
        branch: &str,
    ) -> Result<(), WorkspaceError> {
        if *self.fail_pull.lock().unwrap() {
            return Err(WorkspaceError::NotFastForward {
                branch: branch.to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("pull {branch} with {}", credential.key));
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<(), WorkspaceError> {
        self.calls.lock().unwrap().push(format!("branch {name}"));
        Ok(())
    }
}
