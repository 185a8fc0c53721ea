use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::client::{AgentService, AgentServiceError};
use super::types::{
    Agent, AgentStatus, Conversation, DiamondOutcome, DiamondPlan, FleetResults, Repository,
    SpawnSpec,
};
use crate::config::AgentServiceConfig;
use crate::polling::{poll_until, PollError, PollSchedule, Probe};
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::tokens::{TokenError, TokenRouter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FleetError {
    #[error(transparent)]
    Config(#[from] TokenError),
    #[error(transparent)]
    Service(#[from] AgentServiceError),
    #[error("stopped waiting for agent {id} (last status {last_status:?}): {reason}")]
    WaitAborted {
        id: String,
        last_status: Option<AgentStatus>,
        reason: PollError,
    },
}

impl FleetError {
    /// Whether re-reading later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FleetError::Service(e) => e.is_transient(),
            FleetError::Config(_) | FleetError::WaitAborted { .. } => false,
        }
    }
}

/// Spawns and observes remote agents. The service owns agent state; this
/// type only issues calls and re-reads.
pub struct FleetCoordinator {
    service: Arc<dyn AgentService>,
    router: Arc<TokenRouter>,
    spawned: Mutex<HashMap<String, Instant>>,
    not_found_grace: Duration,
    call_timeout: Duration,
}

impl FleetCoordinator {
    pub fn new(service: Arc<dyn AgentService>, router: Arc<TokenRouter>) -> Self {
        Self {
            service,
            router,
            spawned: Mutex::new(HashMap::new()),
            not_found_grace: Duration::from_secs(120),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_settings(mut self, config: &AgentServiceConfig) -> Self {
        self.not_found_grace = Duration::from_secs(config.not_found_grace_seconds);
        self.call_timeout = Duration::from_secs(config.request_timeout_seconds);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn router(&self) -> &Arc<TokenRouter> {
        &self.router
    }

    async fn bounded<T, Fut>(&self, operation: &str, call: Fut) -> Result<T, FleetError>
    where
        Fut: Future<Output = Result<T, AgentServiceError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(FleetError::from),
            Err(_) => Err(AgentServiceError::Timeout {
                operation: operation.to_string(),
            }
            .into()),
        }
    }

    /// Records a spawn time. Entries past the grace window are dropped here,
    /// so the map only holds agents that can still read as UNKNOWN.
    fn remember_spawn(&self, id: &str) {
        let mut spawned = self.spawned.lock().unwrap_or_else(|p| p.into_inner());
        spawned.retain(|_, at| at.elapsed() <= self.not_found_grace);
        spawned.insert(id.to_string(), Instant::now());
    }

    fn within_grace(&self, id: &str) -> bool {
        let mut spawned = self.spawned.lock().unwrap_or_else(|p| p.into_inner());
        match spawned.get(id) {
            Some(at) if at.elapsed() <= self.not_found_grace => true,
            Some(_) => {
                spawned.remove(id);
                false
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn tracked_spawns(&self) -> usize {
        self.spawned.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Launch one agent. Refuses to spawn against an organization with no
    /// usable credential.
    pub async fn spawn(&self, spec: &SpawnSpec) -> Result<Agent, FleetError> {
        self.router.credential_for(&spec.repository)?;

        let agent = self.bounded("spawn", self.service.spawn(spec)).await?;
        self.remember_spawn(&agent.id);
        info!(agent_id = %agent.id, repository = %spec.repository, "agent spawned");
        Ok(agent)
    }

    /// Current status. An id this coordinator spawned recently and the
    /// service does not know yet reads as `UNKNOWN`.
    pub async fn status(&self, id: &str) -> Result<Agent, FleetError> {
        match self.bounded("status", self.service.status(id)).await {
            Err(FleetError::Service(AgentServiceError::NotFound { .. })) if self.within_grace(id) => {
                debug!(agent_id = %id, "agent not visible yet");
                Ok(Agent::unknown(id))
            }
            other => other,
        }
    }

    pub async fn list(&self) -> Result<Vec<Agent>, FleetError> {
        self.bounded("list", self.service.list()).await
    }

    pub async fn running(&self) -> Result<Vec<Agent>, FleetError> {
        let agents = self.list().await?;
        Ok(agents.into_iter().filter(|a| a.status.is_active()).collect())
    }

    pub async fn repositories(&self) -> Result<Vec<Repository>, FleetError> {
        self.bounded("repositories", self.service.repositories()).await
    }

    pub async fn models(&self) -> Result<Vec<String>, FleetError> {
        self.bounded("models", self.service.models()).await
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation, FleetError> {
        self.bounded("conversation", self.service.conversation(id)).await
    }

    pub async fn followup(&self, id: &str, text: &str) -> Result<(), FleetError> {
        self.bounded("followup", self.service.followup(id, text)).await
    }

    /// Deliver `message` to every id concurrently. Every id gets an entry.
    pub async fn broadcast(&self, ids: &[String], message: &str) -> FleetResults<()> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("broadcast", None, None, Some(&correlation_id));

        async {
            let deliveries = ids.iter().map(|id| async move {
                let result = self.followup(id, message).await;
                if let Err(e) = &result {
                    warn!(agent_id = %id, error = %e, "broadcast delivery failed");
                }
                (id.clone(), result)
            });
            let results: FleetResults<()> = join_all(deliveries).await.into_iter().collect();
            info!(
                targets = ids.len(),
                delivered = results.values().filter(|r| r.is_ok()).count(),
                "broadcast finished"
            );
            results
        }
        .instrument(span)
        .await
    }

    /// Poll until the agent reaches a terminal status. Transient status
    /// read failures count as "not yet"; other failures end the wait.
    pub async fn wait_for(
        &self,
        id: &str,
        schedule: PollSchedule,
        cancel: &CancellationToken,
    ) -> Result<Agent, FleetError> {
        let last_status: Mutex<Option<AgentStatus>> = Mutex::new(None);
        let last = &last_status;

        let outcome = poll_until(schedule, cancel, move || async move {
            match self.status(id).await {
                Ok(agent) => {
                    *last.lock().unwrap_or_else(|p| p.into_inner()) = Some(agent.status);
                    if agent.status.is_terminal() {
                        Probe::Done(Ok(agent))
                    } else {
                        Probe::Pending
                    }
                }
                Err(e) if e.is_transient() => {
                    debug!(agent_id = %id, error = %e, "status check failed, will retry");
                    Probe::Pending
                }
                Err(e) => Probe::Done(Err(e)),
            }
        })
        .await;

        match outcome {
            Ok(read) => read,
            Err(reason) => Err(FleetError::WaitAborted {
                id: id.to_string(),
                last_status: *last_status.lock().unwrap_or_else(|p| p.into_inner()),
                reason,
            }),
        }
    }

    /// Fan out to every target repository, then spawn the counterparty that
    /// aggregates through PR comments on the control-center repository.
    pub async fn create_diamond(&self, plan: &DiamondPlan) -> DiamondOutcome {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("diamond", None, None, Some(&correlation_id));

        async {
            let spawns = plan.target_repos.iter().map(|spec| async move {
                (spec.repository.clone(), self.spawn(spec).await)
            });
            let target_agents: Vec<(String, Result<Agent, FleetError>)> = join_all(spawns).await;

            let mut counterparty = plan.counterparty.clone();
            counterparty.prompt = counterparty_prompt(plan, &target_agents);
            let counterparty_agent = self.spawn(&counterparty).await;

            info!(
                targets = target_agents.len(),
                spawned = target_agents.iter().filter(|(_, r)| r.is_ok()).count(),
                counterparty_ok = counterparty_agent.is_ok(),
                "diamond created"
            );
            DiamondOutcome {
                target_agents,
                counterparty_agent,
            }
        }
        .instrument(span)
        .await
    }

    /// Observe fan-in by waiting on every spawned agent concurrently.
    pub async fn await_diamond(
        &self,
        outcome: &DiamondOutcome,
        schedule: PollSchedule,
        cancel: &CancellationToken,
    ) -> FleetResults<Agent> {
        let waits = outcome.spawned_ids().into_iter().map(|id| async move {
            let result = self.wait_for(&id, schedule, cancel).await;
            (id, result)
        });
        join_all(waits).await.into_iter().collect()
    }
}

fn counterparty_prompt(plan: &DiamondPlan, targets: &[(String, Result<Agent, FleetError>)]) -> String {
    let mut prompt = plan.counterparty.prompt.trim_end().to_string();
    prompt.push_str("\n\n## Coordination\n");
    prompt.push_str(&format!(
        "You are the counterparty for a multi-repository change. The control center is `{}`.\n",
        plan.control_center
    ));
    prompt.push_str(
        "Target agents report progress as pull-request comments. Poll the pull requests and \
         their comments in the control center and in each target repository until every \
         target has finished, then integrate their results.\n\nTargets:\n",
    );
    for (repository, result) in targets {
        match result {
            Ok(agent) => prompt.push_str(&format!("- {repository}: agent {}\n", agent.id)),
            Err(e) => prompt.push_str(&format!("- {repository}: not started ({e})\n")),
        }
    }
    prompt
}
