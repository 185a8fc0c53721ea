use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::analyzer::Analyzer;
use super::blockers::{determine_status, identify_blockers, next_actions};
use super::executor::{FixExecutor, FixRequest};
use super::types::{Blocker, CiStatus, FeedbackSummary, PrStatus, TriageResult};
use crate::config::TriageConfig;
use crate::github::{
    CheckState, CodeHost, GitHubError, IssueRef, MergeOutcome, MergeRequest, PrState,
};
use crate::polling::{poll_until, PollError, Probe};
use crate::single_flight::SingleFlight;
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::tokens::{RepoRef, TokenError, TokenRouter};

#[derive(Debug, Error)]
pub enum TriageError {
    #[error(transparent)]
    Credential(#[from] TokenError),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error("triage was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub max_iterations: u32,
    /// Post the configured review-request comments once ready.
    pub request_reviews: bool,
    /// Merge once ready.
    pub auto_merge: bool,
}

impl ResolveOptions {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            request_reviews: false,
            auto_merge: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub success: bool,
    pub final_status: PrStatus,
    pub iterations: u32,
    pub actions_taken: Vec<String>,
    pub last_triage: TriageResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeOutcome>,
}

/// Gathers PR state, derives status and blockers, and drives the bounded
/// resolution loop.
pub struct TriageEngine {
    host: Arc<dyn CodeHost>,
    router: Arc<TokenRouter>,
    analyzer: Analyzer,
    executor: Option<Arc<dyn FixExecutor>>,
    review_logins: SingleFlight<String, String, String>,
    settings: TriageConfig,
    cancel: CancellationToken,
}

impl TriageEngine {
    pub fn new(
        host: Arc<dyn CodeHost>,
        router: Arc<TokenRouter>,
        analyzer: Analyzer,
        settings: TriageConfig,
    ) -> Self {
        Self {
            host,
            router,
            analyzer,
            executor: None,
            review_logins: SingleFlight::new(),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn FixExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Login behind the review identity, looked up once per credential key.
    async fn review_login(&self) -> Option<String> {
        let credential = match self.router.review_credential() {
            Ok(credential) => credential,
            Err(e) => {
                debug!(error = %e, "review identity unavailable; own comments are not filtered");
                return None;
            }
        };
        let host = Arc::clone(&self.host);
        let key = credential.key.clone();
        let lookup = self
            .review_logins
            .get_or_init(key, move || async move {
                host.authenticated_login(&credential)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
        match lookup {
            Ok(login) => Some(login),
            Err(e) => {
                warn!(error = %e, "could not resolve review identity login");
                None
            }
        }
    }

    /// One fresh triage pass. Nothing from earlier passes is reused.
    pub async fn analyze(&self, repo: &RepoRef, pr_number: u64) -> Result<TriageResult, TriageError> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("triage", None, Some(pr_number), Some(&correlation_id));

        async {
            let credential = self.router.credential_for(&repo.slug())?;
            let pr = self.host.get_pr(&credential, repo, pr_number).await?;
            let (checks, raw) = tokio::try_join!(
                self.host.get_ci_status(&credential, repo, &pr.head_sha),
                self.host.collect_feedback(&credential, repo, pr_number),
            )?;

            let own_login = self.review_login().await;
            let third_party: Vec<_> = raw
                .into_iter()
                .filter(|item| {
                    own_login
                        .as_deref()
                        .map_or(true, |login| !item.author.eq_ignore_ascii_case(login))
                })
                .collect();

            let feedback = FeedbackSummary::new(self.analyzer.classify_feedback(&third_party).await);
            let ci = CiStatus::from_checks(checks);
            let blockers = identify_blockers(&pr, &ci, &feedback);
            let status = determine_status(&pr, &ci, &blockers, feedback.unaddressed);
            let next_actions = next_actions(status, &ci, &feedback, &blockers);

            let mut result = TriageResult {
                repository: repo.slug(),
                pr_number,
                pr_url: pr.url,
                head_branch: pr.head_branch,
                head_sha: pr.head_sha,
                status,
                ci,
                feedback,
                blockers,
                next_actions,
                summary: String::new(),
                timestamp: Utc::now(),
            };
            result.summary = self.analyzer.summarize(&result).await;

            info!(
                status = %result.status,
                blockers = result.blockers.len(),
                unaddressed = result.feedback.unaddressed,
                "triage pass complete"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Re-triage and delegate fixes until the PR is ready, only human
    /// blockers remain, or `max_iterations` passes have run.
    pub async fn run_until_ready(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        options: ResolveOptions,
    ) -> Result<ResolutionReport, TriageError> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("resolve", None, Some(pr_number), Some(&correlation_id));

        async {
            let max_iterations = options.max_iterations.max(1);
            let mut actions = Vec::new();
            let mut iteration = 0;

            loop {
                iteration += 1;
                let triage = self.analyze(repo, pr_number).await?;
                debug!(iteration, status = %triage.status, "resolution iteration");

                match triage.status {
                    PrStatus::Merged => {
                        return Ok(report(true, iteration, actions, triage, None));
                    }
                    PrStatus::Closed => {
                        actions.push("pull request is closed".to_string());
                        return Ok(report(false, iteration, actions, triage, None));
                    }
                    PrStatus::ReadyToMerge => {
                        let merge = self.finish(repo, &triage, options, &mut actions).await?;
                        return Ok(report(true, iteration, actions, triage, merge));
                    }
                    _ => {}
                }

                if triage.only_human_blockers() {
                    actions.push("stopped: only human-resolvable blockers remain".to_string());
                    return Ok(report(false, iteration, actions, triage, None));
                }

                let mut attempted = false;
                if triage.has_fixable_work() {
                    match &self.executor {
                        Some(executor) => {
                            let request = FixRequest {
                                repo: repo.clone(),
                                triage: triage.clone(),
                            };
                            match executor.attempt_fix(&request).await {
                                Ok(attempt) => {
                                    attempted = true;
                                    actions.push(format!(
                                        "fix delegated to agent {} ({:?})",
                                        attempt.agent_id, attempt.channel
                                    ));
                                }
                                Err(e) => {
                                    warn!(error = %e, "fix attempt failed");
                                    actions.push(format!("fix attempt failed: {e}"));
                                }
                            }
                        }
                        None => actions.push("no fix executor configured".to_string()),
                    }
                }

                if iteration >= max_iterations {
                    warn!(iterations = iteration, status = %triage.status, "resolution loop exhausted");
                    return Ok(report(false, iteration, actions, triage, None));
                }

                if attempted || triage.ci.pending > 0 {
                    self.wait_for_ci(repo, pr_number, &triage.head_sha, attempted)
                        .await?;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn finish(
        &self,
        repo: &RepoRef,
        triage: &TriageResult,
        options: ResolveOptions,
        actions: &mut Vec<String>,
    ) -> Result<Option<MergeOutcome>, TriageError> {
        if !options.request_reviews && !options.auto_merge {
            return Ok(None);
        }
        let review = self.router.review_credential()?;

        if options.request_reviews {
            for comment in &self.settings.review_requests {
                self.host
                    .post_comment(&review, repo, triage.pr_number, comment)
                    .await?;
                actions.push(format!("requested review: {comment}"));
            }
        }

        if !options.auto_merge {
            return Ok(None);
        }
        let method = self.settings.merge_method;
        let request = MergeRequest {
            method,
            admin: false,
            auto: false,
        };
        let outcome = self
            .host
            .merge_pr(&review, repo, triage.pr_number, &request)
            .await?;
        actions.push(format!("merged with {method}"));
        Ok(Some(outcome))
    }

    /// Wait until CI settles. After a fix attempt, also wait for a new head
    /// commit. Running out of time is not an error; the next pass re-reads.
    /// Transient read failures are retried, anything else ends the wait.
    async fn wait_for_ci(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        previous_sha: &str,
        expect_new_commit: bool,
    ) -> Result<(), TriageError> {
        let credential = self.router.credential_for(&repo.slug())?;
        let credential = &credential;

        let outcome = poll_until(self.settings.ci_wait, &self.cancel, move || async move {
            let pr = match self.host.get_pr(credential, repo, pr_number).await {
                Ok(pr) => pr,
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "PR read failed while waiting for CI, will retry");
                    return Probe::Pending;
                }
                Err(e) => return Probe::Done(Err(e)),
            };
            if pr.merged || pr.state == PrState::Closed {
                return Probe::Done(Ok(()));
            }
            if expect_new_commit && pr.head_sha == previous_sha {
                return Probe::Pending;
            }
            match self.host.get_ci_status(credential, repo, &pr.head_sha).await {
                Ok(checks) if checks.iter().all(|c| c.state != CheckState::Pending) => {
                    Probe::Done(Ok(()))
                }
                Ok(_) => Probe::Pending,
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "CI read failed while waiting, will retry");
                    Probe::Pending
                }
                Err(e) => Probe::Done(Err(e)),
            }
        })
        .await;

        match outcome {
            Ok(read) => Ok(read?),
            Err(PollError::Cancelled { .. }) => Err(TriageError::Cancelled),
            Err(e @ PollError::TimedOut { .. }) => {
                debug!(error = %e, "CI did not settle before the wait ended");
                Ok(())
            }
        }
    }

    /// Open an issue listing the blockers that need a human. Nothing is
    /// opened when an agent can handle every blocker.
    pub async fn escalate(
        &self,
        repo: &RepoRef,
        triage: &TriageResult,
    ) -> Result<Option<IssueRef>, TriageError> {
        let human: Vec<&Blocker> = triage
            .blockers
            .iter()
            .filter(|b| !b.is_auto_resolvable)
            .collect();
        if human.is_empty() {
            return Ok(None);
        }

        let credential = self.router.credential_for(&repo.slug())?;
        let title = format!("PR #{} is {} and needs a human", triage.pr_number, triage.status);
        let mut body = format!("Automated resolution of {} stopped.\n\n", triage.pr_url);
        for blocker in human {
            body.push_str(&format!("- {}: {}\n", blocker.kind, blocker.description));
        }

        let issue = self.host.create_issue(&credential, repo, &title, &body).await?;
        info!(issue = issue.number, pr_number = triage.pr_number, "blockers escalated");
        Ok(Some(issue))
    }
}

fn report(
    success: bool,
    iterations: u32,
    actions_taken: Vec<String>,
    last_triage: TriageResult,
    merge: Option<MergeOutcome>,
) -> ResolutionReport {
    ResolutionReport {
        success,
        final_status: last_triage.status,
        iterations,
        actions_taken,
        last_triage,
        merge,
    }
}
