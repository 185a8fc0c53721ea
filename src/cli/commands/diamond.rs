use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

use super::{print_json, results_json, App, Command};
use fleet_control::fleet::{DiamondOutcome, DiamondPlan};

pub struct DiamondCommand {
    pub plan: PathBuf,
    pub wait: bool,
}

fn outcome_json(outcome: &DiamondOutcome) -> Value {
    let targets: Vec<Value> = outcome
        .target_agents
        .iter()
        .map(|(repository, result)| match result {
            Ok(agent) => json!({ "repository": repository, "agent": agent }),
            Err(e) => json!({ "repository": repository, "error": e.to_string() }),
        })
        .collect();
    let counterparty = match &outcome.counterparty_agent {
        Ok(agent) => json!({ "agent": agent }),
        Err(e) => json!({ "error": e.to_string() }),
    };
    json!({ "targets": targets, "counterparty": counterparty })
}

impl Command for DiamondCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let raw = tokio::fs::read_to_string(&self.plan)
            .await
            .with_context(|| format!("failed to read {}", self.plan.display()))?;
        let plan: DiamondPlan = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a diamond plan", self.plan.display()))?;

        let fleet = app.fleet()?;
        let outcome = fleet.create_diamond(&plan).await;
        let mut report = outcome_json(&outcome);

        if self.wait {
            let finished = fleet
                .await_diamond(&outcome, app.config.agents.wait, &app.cancel)
                .await;
            report["finished"] = results_json(&finished);
        }
        print_json(&report)
    }
}
