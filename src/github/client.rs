use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use octocrab::Octocrab;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::errors::GitHubError;
use super::types::{
    CheckState, CiCheck, FeedbackSource, IssueRef, MergeMethod, MergeOutcome, MergeRequest,
    PrState, PullRequestInfo, RawFeedback,
};
use crate::tokens::{Credential, RepoRef};

/// Code-hosting operations used by triage and handoff. Every call carries the
/// credential it must be made with; picking it is the caller's job.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn get_pr(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestInfo, GitHubError>;

    /// Check runs and commit statuses for a commit.
    async fn get_ci_status(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        head_sha: &str,
    ) -> Result<Vec<CiCheck>, GitHubError>;

    /// Conversation comments, review bodies and inline review comments.
    async fn collect_feedback(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<RawFeedback>, GitHubError>;

    async fn merge_pr(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeOutcome, GitHubError>;

    async fn create_issue(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, GitHubError>;

    async fn post_comment(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError>;

    /// Login of the account behind a credential.
    async fn authenticated_login(&self, credential: &Credential) -> Result<String, GitHubError>;
}

#[derive(Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Deserialize)]
struct BranchPayload {
    #[serde(rename = "ref")]
    ref_field: String,
    sha: String,
}

#[derive(Deserialize)]
struct PullPayload {
    number: u64,
    html_url: String,
    #[serde(default)]
    title: String,
    state: PrState,
    #[serde(default)]
    merged: bool,
    mergeable: Option<bool>,
    mergeable_state: Option<String>,
    head: BranchPayload,
    base: BranchPayload,
    node_id: Option<String>,
    user: Option<UserPayload>,
}

#[derive(Deserialize)]
struct CheckRunPayload {
    name: String,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
    output: Option<CheckOutputPayload>,
}

#[derive(Deserialize)]
struct CheckOutputPayload {
    title: Option<String>,
}

#[derive(Deserialize)]
struct CheckRunsPayload {
    #[serde(default)]
    check_runs: Vec<CheckRunPayload>,
}

#[derive(Deserialize)]
struct CommitStatusPayload {
    context: String,
    state: String,
    target_url: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct CombinedStatusPayload {
    #[serde(default)]
    statuses: Vec<CommitStatusPayload>,
}

#[derive(Deserialize)]
struct CommentPayload {
    id: u64,
    user: Option<UserPayload>,
    body: Option<String>,
    path: Option<String>,
    line: Option<u64>,
    original_line: Option<u64>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ReviewPayload {
    id: u64,
    user: Option<UserPayload>,
    body: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

const ENABLE_AUTO_MERGE: &str = r#"
mutation($pullRequestId: ID!, $mergeMethod: PullRequestMergeMethod!) {
  enablePullRequestAutoMerge(input: {pullRequestId: $pullRequestId, mergeMethod: $mergeMethod}) {
    pullRequest { number }
  }
}"#;

/// `CodeHost` over octocrab. Clients are cached per credential key.
#[derive(Debug)]
pub struct OctocrabHost {
    clients: Cache<String, Octocrab>,
    timeout: Duration,
}

impl Default for OctocrabHost {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl OctocrabHost {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: Cache::builder()
                .max_capacity(64)
                .time_to_idle(Duration::from_secs(30 * 60))
                .build(),
            timeout,
        }
    }

    async fn client(&self, credential: &Credential) -> Result<Octocrab, GitHubError> {
        if let Some(client) = self.clients.get(&credential.key).await {
            return Ok(client);
        }
        let client = Octocrab::builder()
            .personal_token(credential.token.clone())
            .build()?;
        self.clients
            .insert(credential.key.clone(), client.clone())
            .await;
        Ok(client)
    }

    async fn bounded<T, Fut>(&self, operation: &str, call: Fut) -> Result<T, GitHubError>
    where
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(GitHubError::Timeout {
                    operation: operation.to_string(),
                    duration_ms: self.timeout.as_millis() as u64,
                })
            })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        credential: &Credential,
        route: String,
    ) -> Result<T, GitHubError> {
        let client = self.client(credential).await?;
        debug!(route = %route, "GitHub GET");
        self.bounded(&route, async {
            client
                .get::<T, _, ()>(&route, None)
                .await
                .map_err(GitHubError::from)
        })
        .await
    }

    async fn enable_auto_merge(
        &self,
        client: &Octocrab,
        pr: &PullRequestInfo,
        method: MergeMethod,
    ) -> Result<(), GitHubError> {
        let node_id = pr.node_id.as_deref().ok_or_else(|| {
            GitHubError::UnexpectedResponse(format!("PR #{} has no node id", pr.number))
        })?;
        let payload = json!({
            "query": ENABLE_AUTO_MERGE,
            "variables": {
                "pullRequestId": node_id,
                "mergeMethod": method.to_string().to_uppercase(),
            }
        });
        let response: serde_json::Value = client.graphql(&payload).await?;
        if let Some(errors) = response.get("errors").filter(|e| !e.is_null()) {
            return Err(GitHubError::MergeRejected {
                pr_number: pr.number,
                message: errors.to_string(),
            });
        }
        Ok(())
    }
}

fn octocrab_method(method: MergeMethod) -> octocrab::params::pulls::MergeMethod {
    match method {
        MergeMethod::Merge => octocrab::params::pulls::MergeMethod::Merge,
        MergeMethod::Squash => octocrab::params::pulls::MergeMethod::Squash,
        MergeMethod::Rebase => octocrab::params::pulls::MergeMethod::Rebase,
    }
}

fn login_of(user: Option<UserPayload>) -> String {
    user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string())
}

#[async_trait]
impl CodeHost for OctocrabHost {
    async fn get_pr(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestInfo, GitHubError> {
        let pr: PullPayload = self
            .fetch(credential, format!("/repos/{}/pulls/{number}", repo.slug()))
            .await?;
        Ok(PullRequestInfo {
            number: pr.number,
            url: pr.html_url,
            title: pr.title,
            state: pr.state,
            merged: pr.merged,
            mergeable: pr.mergeable,
            mergeable_state: pr.mergeable_state,
            head_branch: pr.head.ref_field,
            head_sha: pr.head.sha,
            base_branch: pr.base.ref_field,
            node_id: pr.node_id,
            author: pr.user.map(|u| u.login),
        })
    }

    async fn get_ci_status(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        head_sha: &str,
    ) -> Result<Vec<CiCheck>, GitHubError> {
        let runs: CheckRunsPayload = self
            .fetch(
                credential,
                format!("/repos/{}/commits/{head_sha}/check-runs?per_page=100", repo.slug()),
            )
            .await?;
        let statuses: CombinedStatusPayload = self
            .fetch(credential, format!("/repos/{}/commits/{head_sha}/status", repo.slug()))
            .await?;

        let mut checks: Vec<CiCheck> = runs
            .check_runs
            .into_iter()
            .map(|run| CiCheck {
                state: CheckState::from_platform(run.status.as_deref(), run.conclusion.as_deref()),
                name: run.name,
                url: run.html_url,
                summary: run.output.and_then(|o| o.title),
            })
            .collect();
        checks.extend(statuses.statuses.into_iter().map(|status| CiCheck {
            state: CheckState::from_platform(None, Some(&status.state)),
            name: status.context,
            url: status.target_url,
            summary: status.description,
        }));
        Ok(checks)
    }

    async fn collect_feedback(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<RawFeedback>, GitHubError> {
        let slug = repo.slug();
        let comments: Vec<CommentPayload> = self
            .fetch(credential, format!("/repos/{slug}/issues/{number}/comments?per_page=100"))
            .await?;
        let reviews: Vec<ReviewPayload> = self
            .fetch(credential, format!("/repos/{slug}/pulls/{number}/reviews?per_page=100"))
            .await?;
        let inline: Vec<CommentPayload> = self
            .fetch(credential, format!("/repos/{slug}/pulls/{number}/comments?per_page=100"))
            .await?;

        let mut feedback = Vec::new();
        for comment in comments {
            let Some(body) = comment.body.filter(|b| !b.trim().is_empty()) else {
                continue;
            };
            feedback.push(RawFeedback {
                id: format!("comment-{}", comment.id),
                author: login_of(comment.user),
                body,
                path: None,
                line: None,
                source: FeedbackSource::IssueComment,
                created_at: comment.created_at,
            });
        }
        for review in reviews {
            let Some(body) = review.body.filter(|b| !b.trim().is_empty()) else {
                continue;
            };
            feedback.push(RawFeedback {
                id: format!("review-{}", review.id),
                author: login_of(review.user),
                body,
                path: None,
                line: None,
                source: FeedbackSource::Review,
                created_at: review.submitted_at,
            });
        }
        for comment in inline {
            let Some(body) = comment.body.filter(|b| !b.trim().is_empty()) else {
                continue;
            };
            feedback.push(RawFeedback {
                id: format!("review-comment-{}", comment.id),
                author: login_of(comment.user),
                body,
                path: comment.path,
                line: comment.line.or(comment.original_line),
                source: FeedbackSource::ReviewComment,
                created_at: comment.created_at,
            });
        }

        debug!(pr_number = number, items = feedback.len(), "collected PR feedback");
        Ok(feedback)
    }

    async fn merge_pr(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeOutcome, GitHubError> {
        let client = self.client(credential).await?;

        if request.auto {
            let pr = self.get_pr(credential, repo, number).await?;
            self.bounded("enable_auto_merge", self.enable_auto_merge(&client, &pr, request.method))
                .await?;
            info!(pr_number = number, method = %request.method, "auto-merge enabled");
            return Ok(MergeOutcome {
                merged: false,
                auto_merge_enabled: true,
                sha: None,
                message: "auto-merge enabled".to_string(),
            });
        }

        let merge = self
            .bounded("merge_pr", async {
                client
                    .pulls(&repo.owner, &repo.name)
                    .merge(number)
                    .method(octocrab_method(request.method))
                    .send()
                    .await
                    .map_err(GitHubError::from)
            })
            .await?;

        let message = merge.message.unwrap_or_default();
        if !merge.merged {
            return Err(GitHubError::MergeRejected {
                pr_number: number,
                message,
            });
        }
        info!(pr_number = number, method = %request.method, admin = request.admin, "pull request merged");
        Ok(MergeOutcome {
            merged: true,
            auto_merge_enabled: false,
            sha: merge.sha,
            message,
        })
    }

    async fn create_issue(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, GitHubError> {
        let client = self.client(credential).await?;
        let issue = self
            .bounded("create_issue", async {
                client
                    .issues(&repo.owner, &repo.name)
                    .create(title)
                    .body(body)
                    .send()
                    .await
                    .map_err(GitHubError::from)
            })
            .await?;
        Ok(IssueRef {
            number: issue.number,
            url: issue.html_url.to_string(),
        })
    }

    async fn post_comment(
        &self,
        credential: &Credential,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let client = self.client(credential).await?;
        self.bounded("post_comment", async {
            client
                .issues(&repo.owner, &repo.name)
                .create_comment(number, body)
                .await
                .map_err(GitHubError::from)
        })
        .await?;
        debug!(pr_number = number, "comment posted");
        Ok(())
    }

    async fn authenticated_login(&self, credential: &Credential) -> Result<String, GitHubError> {
        let user: UserPayload = self.fetch(credential, "/user".to_string()).await?;
        Ok(user.login)
    }
}
