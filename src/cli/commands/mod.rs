use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use fleet_control::fleet::FleetResults;
use fleet_control::handoff::{FileHandoffStore, Git2Workspace, HandoffCoordinator};
use fleet_control::llm::{ModelPool, ProviderRegistry};
use fleet_control::tokens::EnvTokenSource;
use fleet_control::triage::{AgentFixExecutor, Analyzer, TriageEngine};
use fleet_control::{FleetControlConfig, FleetCoordinator, HttpAgentService, OctocrabHost, TokenRouter};

pub mod agents;
pub mod diamond;
pub mod handoff;
pub mod tokens;
pub mod triage;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, app: &App) -> Result<()>;
}

/// Components wired from configuration. Each is built on first use so a
/// command only needs the credentials it actually touches.
pub struct App {
    pub config: FleetControlConfig,
    pub router: Arc<TokenRouter>,
    pub cancel: CancellationToken,
}

impl App {
    pub fn new(config: FleetControlConfig, cancel: CancellationToken) -> Self {
        let router = Arc::new(TokenRouter::from_env(&config.tokens));
        Self {
            config,
            router,
            cancel,
        }
    }

    pub fn fleet(&self) -> Result<Arc<FleetCoordinator>> {
        let service = HttpAgentService::from_env(&self.config.agents)
            .context("agent service is not configured")?;
        Ok(Arc::new(
            FleetCoordinator::new(Arc::new(service), Arc::clone(&self.router))
                .with_settings(&self.config.agents),
        ))
    }

    pub fn host(&self) -> Arc<OctocrabHost> {
        Arc::new(OctocrabHost::new(Duration::from_secs(
            self.config.agents.request_timeout_seconds,
        )))
    }

    pub fn analyzer(&self) -> Analyzer {
        let pool = ModelPool::new(
            ProviderRegistry::builtin(),
            self.config.llm.clone(),
            Arc::new(EnvTokenSource),
        );
        Analyzer::new(Arc::new(pool))
    }

    pub fn triage_engine(&self, with_fixes: bool) -> Result<TriageEngine> {
        let engine = TriageEngine::new(
            self.host(),
            Arc::clone(&self.router),
            self.analyzer(),
            self.config.triage.clone(),
        )
        .with_cancellation(self.cancel.clone());

        if !with_fixes {
            return Ok(engine);
        }
        let executor = AgentFixExecutor::new(self.fleet()?);
        Ok(engine.with_executor(Arc::new(executor)))
    }

    pub fn handoff(&self) -> Result<HandoffCoordinator> {
        let settings = self.config.handoff.clone();
        Ok(HandoffCoordinator::new(
            self.fleet()?,
            self.host(),
            self.analyzer(),
            Arc::new(FileHandoffStore::new(settings.store_dir.clone())),
            Arc::new(Git2Workspace::new(settings.workspace_dir.clone())),
            settings,
        )
        .with_cancellation(self.cancel.clone()))
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Per-id results with errors rendered as messages.
pub fn results_json<T: Serialize>(results: &FleetResults<T>) -> Value {
    let mut rendered = serde_json::Map::new();
    for (id, result) in results {
        let entry = match result {
            Ok(value) => json!({ "ok": value }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        rendered.insert(id.clone(), entry);
    }
    Value::Object(rendered)
}
