use chrono::{DateTime, Utc};
use regex::Regex;
use statig::prelude::*;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use super::state_machine::{HandoffEvent, HandoffFlow};
use super::store::{HandoffStore, StoreError};
use super::types::{
    HandoffContext, HandoffOptions, HandoffOutcome, HandoffPhase, TakeoverOptions, TakeoverReport,
};
use super::workspace::{Workspace, WorkspaceError};
use crate::config::HandoffConfig;
use crate::fleet::{Conversation, FleetCoordinator, FleetError, MessageKind, SpawnSpec};
use crate::github::{CodeHost, GitHubError, MergeOutcome, MergeRequest};
use crate::polling::{poll_until, PollError, Probe};
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::tokens::{Credential, RepoRef, TokenError};
use crate::triage::{Analyzer, Task, TaskStatus, WorkAnalysis};

const FALLBACK_DEFAULT_BRANCH: &str = "main";

static BRANCH_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._/-]{1,255}$").expect("branch pattern is valid")
});

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: &'static str },

    #[error("admin and auto merge modes are mutually exclusive")]
    ConflictingMergeModes,

    #[error("'{reference}' does not name a repository")]
    InvalidRepository { reference: String },

    #[error(transparent)]
    Credential(#[from] TokenError),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("merging PR #{pr_number} failed: {source}")]
    Merge {
        pr_number: u64,
        #[source]
        source: GitHubError,
    },

    #[error("PR #{pr_number} was neither merged nor queued for auto-merge: {message}")]
    MergeNotCompleted { pr_number: u64, message: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("could not notify predecessor {predecessor_id}: {source}")]
    Notify {
        predecessor_id: String,
        #[source]
        source: FleetError,
    },

    #[error("successor {successor_id} did not confirm health: {reason}")]
    HealthNotConfirmed {
        successor_id: String,
        reason: PollError,
    },
}

/// Checks a branch name before it reaches git or the hosting API.
pub fn validate_branch_name(name: &str) -> Result<(), HandoffError> {
    let reject = |reason| {
        Err(HandoffError::InvalidBranchName {
            name: name.to_string(),
            reason,
        })
    };
    if !BRANCH_CHARS.is_match(name) {
        return reject("only letters, digits, '.', '_', '/' and '-' are allowed (1-255 chars)");
    }
    if name.starts_with('-') || name.starts_with('/') {
        return reject("must not start with '-' or '/'");
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return reject("must not contain '..', '//' or '@{'");
    }
    if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        return reject("must not end with '/', '.' or '.lock'");
    }
    Ok(())
}

/// Moves in-flight work from a predecessor agent to a freshly spawned
/// successor, then lets the successor merge and branch off.
pub struct HandoffCoordinator {
    fleet: Arc<FleetCoordinator>,
    host: Arc<dyn CodeHost>,
    analyzer: Analyzer,
    store: Arc<dyn HandoffStore>,
    workspace: Arc<dyn Workspace>,
    settings: HandoffConfig,
    cancel: CancellationToken,
}

impl HandoffCoordinator {
    pub fn new(
        fleet: Arc<FleetCoordinator>,
        host: Arc<dyn CodeHost>,
        analyzer: Analyzer,
        store: Arc<dyn HandoffStore>,
        workspace: Arc<dyn Workspace>,
        settings: HandoffConfig,
    ) -> Self {
        Self {
            fleet,
            host,
            analyzer,
            store,
            workspace,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Capture the predecessor's work, persist it, spawn the successor and
    /// wait for its health marker.
    ///
    /// Failures before the context is persisted are errors: no handoff was
    /// promised. Later failures come back as an unsuccessful outcome that
    /// still carries the context so the handoff can be resumed.
    pub async fn initiate_handoff(
        &self,
        predecessor_id: &str,
        options: &HandoffOptions,
    ) -> Result<HandoffOutcome, HandoffError> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("handoff", Some(predecessor_id), None, Some(&correlation_id));

        async {
            let predecessor = self.fleet.status(predecessor_id).await?;
            let repository = options
                .repository
                .clone()
                .unwrap_or_else(|| predecessor.source.repository.clone());
            if RepoRef::parse(&repository).is_none() {
                return Err(HandoffError::InvalidRepository {
                    reference: repository,
                });
            }

            let work = self.capture_work(predecessor_id, &options.fallback_tasks).await;
            let context = HandoffContext {
                predecessor_id: predecessor_id.to_string(),
                predecessor_pr: predecessor.pr_number(),
                predecessor_branch: predecessor.branch_name().map(str::to_string),
                repository,
                handoff_time: Utc::now(),
                completed_work: work.completed,
                outstanding_tasks: work.outstanding,
                decisions: work.decisions,
                summary: work.summary,
            };

            self.store.save(&context).await?;
            Ok(self.spawn_successor(context, options).await)
        }
        .instrument(span)
        .await
    }

    /// Continue a handoff whose context was persisted but whose successor
    /// never came up.
    pub async fn resume_handoff(
        &self,
        predecessor_id: &str,
        options: &HandoffOptions,
    ) -> Result<HandoffOutcome, HandoffError> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("handoff_resume", Some(predecessor_id), None, Some(&correlation_id));

        async {
            let context = self.store.load(predecessor_id).await?;
            info!(handoff_time = %context.handoff_time, "resuming persisted handoff");
            Ok(self.spawn_successor(context, options).await)
        }
        .instrument(span)
        .await
    }

    /// Successor-side acknowledgement: tells the predecessor that the
    /// successor is up and has the context.
    pub async fn confirm_health(
        &self,
        predecessor_id: &str,
        successor_id: &str,
    ) -> Result<(), HandoffError> {
        self.store.load(predecessor_id).await?;
        let message = format!(
            "{} Successor agent {successor_id} is running and has loaded the handoff context.",
            self.settings.confirmation_marker
        );
        self.fleet.followup(predecessor_id, &message).await?;
        info!(predecessor_id, successor_id, "health confirmation sent");
        Ok(())
    }

    /// Poll the successor's conversation for the confirmation marker in an
    /// assistant message written at or after `since`.
    pub async fn wait_for_health(
        &self,
        successor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<(), HandoffError> {
        let marker = self.settings.confirmation_marker.as_str();
        let outcome = poll_until(self.settings.health, &self.cancel, move || async move {
            match self.fleet.conversation(successor_id).await {
                Ok(conversation) if contains_marker(&conversation, marker, since) => Probe::Done(()),
                Ok(_) => Probe::Pending,
                Err(e) => {
                    warn!(successor_id, error = %e, "conversation read failed, will retry");
                    Probe::Pending
                }
            }
        })
        .await;

        outcome.map_err(|reason| HandoffError::HealthNotConfirmed {
            successor_id: successor_id.to_string(),
            reason,
        })
    }

    /// Merge the predecessor's PR, pull the default branch and create the
    /// successor's own branch. Stops at the first failing step.
    pub async fn takeover(
        &self,
        predecessor_id: &str,
        predecessor_pr: u64,
        new_branch: &str,
        options: TakeoverOptions,
    ) -> Result<TakeoverReport, HandoffError> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "takeover",
            Some(predecessor_id),
            Some(predecessor_pr),
            Some(&correlation_id),
        );

        async {
            let mut flow = HandoffFlow::new(predecessor_id).state_machine();
            flow.handle(&HandoffEvent::Adopted);

            match self
                .run_takeover(predecessor_id, predecessor_pr, new_branch, options)
                .await
            {
                Ok(merge) => {
                    flow.handle(&HandoffEvent::TakeoverCompleted);
                    Ok(TakeoverReport {
                        success: true,
                        phase: flow.inner().phase(),
                        predecessor_id: predecessor_id.to_string(),
                        predecessor_pr,
                        new_branch: new_branch.to_string(),
                        merge,
                    })
                }
                Err(e) => {
                    flow.handle(&HandoffEvent::Fail {
                        reason: e.to_string(),
                    });
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_takeover(
        &self,
        predecessor_id: &str,
        predecessor_pr: u64,
        new_branch: &str,
        options: TakeoverOptions,
    ) -> Result<MergeOutcome, HandoffError> {
        validate_branch_name(new_branch)?;
        if options.admin && options.auto {
            return Err(HandoffError::ConflictingMergeModes);
        }

        let context = self.store.load(predecessor_id).await?;
        let repo = RepoRef::parse(&context.repository).ok_or_else(|| {
            HandoffError::InvalidRepository {
                reference: context.repository.clone(),
            }
        })?;
        let router = self.fleet.router();
        let credential = router.credential_for(&repo.slug())?;

        let request = MergeRequest {
            method: options.merge_method,
            admin: options.admin,
            auto: options.auto,
        };
        let merge = self
            .host
            .merge_pr(&credential, &repo, predecessor_pr, &request)
            .await
            .map_err(|source| HandoffError::Merge {
                pr_number: predecessor_pr,
                source,
            })?;
        if !merge.merged && !merge.auto_merge_enabled {
            return Err(HandoffError::MergeNotCompleted {
                pr_number: predecessor_pr,
                message: merge.message.clone(),
            });
        }
        info!(pr_number = predecessor_pr, merged = merge.merged, "predecessor PR handled");

        let default_branch = router
            .default_branch(&repo.slug())
            .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string());
        self.in_workspace(credential.clone(), move |workspace, credential| {
            workspace.pull_default_branch(credential, &default_branch)
        })
        .await?;

        let branch = new_branch.to_string();
        self.in_workspace(credential, move |workspace, _| workspace.create_branch(&branch))
            .await?;

        let notice = format!(
            "Handoff complete: PR #{predecessor_pr} is merged and work continues on branch \
             `{new_branch}`. You can stop working on this task."
        );
        self.fleet
            .followup(predecessor_id, &notice)
            .await
            .map_err(|source| HandoffError::Notify {
                predecessor_id: predecessor_id.to_string(),
                source,
            })?;

        Ok(merge)
    }

    /// Run a blocking git operation off the async runtime.
    async fn in_workspace<F>(&self, credential: Credential, op: F) -> Result<(), HandoffError>
    where
        F: FnOnce(&dyn Workspace, &Credential) -> Result<(), WorkspaceError> + Send + 'static,
    {
        let workspace = Arc::clone(&self.workspace);
        tokio::task::spawn_blocking(move || op(workspace.as_ref(), &credential))
            .await
            .map_err(|e| WorkspaceError::Task(e.to_string()))??;
        Ok(())
    }

    async fn capture_work(&self, predecessor_id: &str, fallback: &[Task]) -> WorkAnalysis {
        let analysis = match self.fleet.conversation(predecessor_id).await {
            Ok(conversation) => self
                .analyzer
                .extract_work(&conversation)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match analysis {
            Ok(work) => work,
            Err(reason) => {
                warn!(predecessor_id, reason = %reason, "work analysis failed, using supplied tasks");
                let (completed, outstanding): (Vec<Task>, Vec<Task>) = fallback
                    .iter()
                    .cloned()
                    .partition(|task| task.status == TaskStatus::Completed);
                WorkAnalysis {
                    completed,
                    outstanding,
                    decisions: Vec::new(),
                    summary: String::new(),
                }
            }
        }
    }

    async fn spawn_successor(
        &self,
        context: HandoffContext,
        options: &HandoffOptions,
    ) -> HandoffOutcome {
        let mut flow = HandoffFlow::new(context.predecessor_id.clone()).state_machine();

        let prompt = successor_prompt(&context, &self.settings.confirmation_marker);
        let mut spec = SpawnSpec::new(context.repository.clone(), prompt).with_model(options.model.clone());
        if let Some(branch) = &context.predecessor_branch {
            spec = spec.on_ref(branch.clone());
        }

        let successor = match self.fleet.spawn(&spec).await {
            Ok(agent) => agent,
            Err(e) => {
                flow.handle(&HandoffEvent::Fail {
                    reason: e.to_string(),
                });
                return outcome(flow.inner(), context);
            }
        };
        flow.handle(&HandoffEvent::SuccessorSpawned {
            successor_id: successor.id.clone(),
        });

        if options.skip_health_wait {
            return outcome(flow.inner(), context);
        }

        match self.wait_for_health(&successor.id, context.handoff_time).await {
            Ok(()) => flow.handle(&HandoffEvent::HealthConfirmed),
            Err(e) => flow.handle(&HandoffEvent::Fail {
                reason: e.to_string(),
            }),
        }
        outcome(flow.inner(), context)
    }
}

fn outcome(flow: &HandoffFlow, context: HandoffContext) -> HandoffOutcome {
    let phase = flow.phase();
    HandoffOutcome {
        success: phase != HandoffPhase::Failed,
        phase,
        predecessor_id: flow.predecessor_id.clone(),
        successor_id: flow.successor_id.clone(),
        context,
        error: flow.failure.clone(),
    }
}

/// Marker in an assistant message written at or after `since`. Messages
/// without a timestamp count; the successor's transcript starts after the
/// handoff.
pub fn contains_marker(conversation: &Conversation, marker: &str, since: DateTime<Utc>) -> bool {
    conversation.messages.iter().any(|message| {
        message.kind == MessageKind::Assistant
            && message.timestamp.map_or(true, |at| at >= since)
            && message.text.contains(marker)
    })
}

/// Instructions for the successor. The steps are imperative and ordered.
pub fn successor_prompt(context: &HandoffContext, marker: &str) -> String {
    let mut prompt = format!(
        "You are taking over in-progress work from agent {} on {}.\n",
        context.predecessor_id, context.repository
    );
    if !context.summary.is_empty() {
        let _ = writeln!(prompt, "\nWhere things stand: {}", context.summary);
    }

    push_tasks(&mut prompt, "Completed work", &context.completed_work);
    push_tasks(&mut prompt, "Outstanding tasks", &context.outstanding_tasks);
    if !context.decisions.is_empty() {
        prompt.push_str("\n## Decisions already made\n");
        for decision in &context.decisions {
            let _ = writeln!(prompt, "- {decision}");
        }
    }

    prompt.push_str("\n## Steps\n");
    let _ = writeln!(
        prompt,
        "1. Confirm you are healthy: reply with a message containing exactly `{marker}`."
    );
    let _ = writeln!(
        prompt,
        "2. Load the handoff context above and do not redo completed work."
    );
    match (context.predecessor_pr, &context.predecessor_branch) {
        (Some(pr), Some(branch)) => {
            let _ = writeln!(
                prompt,
                "3. Take over: merge PR #{pr} (branch `{branch}`), pull the default branch and \
                 create your own branch from it."
            );
        }
        (Some(pr), None) => {
            let _ = writeln!(
                prompt,
                "3. Take over: merge PR #{pr}, pull the default branch and create your own \
                 branch from it."
            );
        }
        _ => {
            let _ = writeln!(
                prompt,
                "3. Take over: create your own branch from the default branch."
            );
        }
    }
    let _ = writeln!(
        prompt,
        "4. Finish the outstanding tasks and open your own pull request."
    );
    prompt
}

fn push_tasks(prompt: &mut String, heading: &str, tasks: &[Task]) {
    if tasks.is_empty() {
        return;
    }
    let _ = writeln!(prompt, "\n## {heading}");
    for task in tasks {
        let _ = write!(prompt, "- [{:?}] {}", task.priority, task.title);
        if let Some(description) = &task.description {
            let _ = write!(prompt, ": {description}");
        }
        if !task.blockers.is_empty() {
            let _ = write!(prompt, " (blocked by: {})", task.blockers.join(", "));
        }
        prompt.push('\n');
    }
}
