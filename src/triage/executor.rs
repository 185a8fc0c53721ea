use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use super::types::{BlockerKind, TriageResult};
use crate::fleet::{Agent, FleetCoordinator, FleetError, SpawnSpec};
use crate::tokens::RepoRef;

/// One unit of fix work handed to the execution layer.
#[derive(Debug, Clone)]
pub struct FixRequest {
    pub repo: RepoRef,
    pub triage: TriageResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixChannel {
    /// Follow-up sent to the agent that owns the PR.
    Followup,
    /// New agent started on the PR branch.
    Spawned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixAttempt {
    pub agent_id: String,
    pub channel: FixChannel,
}

/// Execution layer of the resolution loop. One call may address several
/// blockers.
#[async_trait]
pub trait FixExecutor: Send + Sync {
    async fn attempt_fix(&self, request: &FixRequest) -> Result<FixAttempt, FleetError>;
}

/// Sends fix instructions to the PR's own agent, or spawns one on the branch.
pub struct AgentFixExecutor {
    fleet: Arc<FleetCoordinator>,
    model: Option<String>,
}

impl AgentFixExecutor {
    pub fn new(fleet: Arc<FleetCoordinator>) -> Self {
        Self { fleet, model: None }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    async fn owning_agent(&self, request: &FixRequest) -> Option<Agent> {
        let agents = match self.fleet.running().await {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "could not list agents; a new fix agent will be spawned");
                return None;
            }
        };
        agents.into_iter().find(|agent| {
            agent.pr_number() == Some(request.triage.pr_number)
                && RepoRef::parse(&agent.source.repository)
                    .is_some_and(|repo| repo.same_as(&request.repo))
        })
    }
}

#[async_trait]
impl FixExecutor for AgentFixExecutor {
    async fn attempt_fix(&self, request: &FixRequest) -> Result<FixAttempt, FleetError> {
        let instructions = fix_instructions(&request.triage);

        if let Some(agent) = self.owning_agent(request).await {
            self.fleet.followup(&agent.id, &instructions).await?;
            info!(agent_id = %agent.id, pr_number = request.triage.pr_number, "fix requested from owning agent");
            return Ok(FixAttempt {
                agent_id: agent.id,
                channel: FixChannel::Followup,
            });
        }

        let branch = &request.triage.head_branch;
        let mut spec = SpawnSpec::new(request.repo.slug(), instructions)
            .on_ref(branch.clone())
            .with_branch(branch.clone())
            .with_model(self.model.clone());
        spec.auto_create_pr = false;

        let agent = self.fleet.spawn(&spec).await?;
        info!(agent_id = %agent.id, pr_number = request.triage.pr_number, "fix agent spawned");
        Ok(FixAttempt {
            agent_id: agent.id,
            channel: FixChannel::Spawned,
        })
    }
}

/// Instructions covering every auto-resolvable blocker and unaddressed
/// feedback item of a triage pass.
pub fn fix_instructions(triage: &TriageResult) -> String {
    let mut text = format!(
        "Pull request #{} ({}) on branch `{}` is not ready to merge. Push fixes to that branch \
         for the items below. Do not open a new pull request.\n",
        triage.pr_number, triage.pr_url, triage.head_branch
    );

    let ci: Vec<_> = triage
        .blockers
        .iter()
        .filter(|b| b.kind == BlockerKind::CiFailure)
        .collect();
    if !ci.is_empty() {
        text.push_str("\n## Failing CI checks\n");
        for blocker in ci {
            let _ = writeln!(text, "- {}", blocker.description);
            if let Some(fix) = &blocker.suggested_fix {
                let _ = writeln!(text, "  {fix}");
            }
        }
    }

    let feedback: Vec<_> = triage
        .feedback
        .unaddressed_items()
        .filter(|item| item.is_auto_resolvable)
        .collect();
    if !feedback.is_empty() {
        text.push_str("\n## Review feedback\n");
        for item in feedback {
            let location = match (&item.path, item.line) {
                (Some(path), Some(line)) => format!(" ({path}:{line})"),
                (Some(path), None) => format!(" ({path})"),
                _ => String::new(),
            };
            let _ = writeln!(
                text,
                "- [{:?}] {}{}: {}",
                item.severity,
                item.author,
                location,
                item.body.trim()
            );
            if let Some(action) = &item.suggested_action {
                let _ = writeln!(text, "  Suggested: {action}");
            }
        }
    }

    text
}
