use anyhow::{bail, Result};

use super::{print_json, results_json, App, Command};
use fleet_control::fleet::SpawnSpec;
use fleet_control::PollSchedule;

pub enum AgentsCommand {
    List,
    Running,
    Status(String),
    Spawn(SpawnSpec),
    Broadcast { ids: Vec<String>, message: String },
    Wait {
        id: String,
        interval: Option<u64>,
        timeout: Option<u64>,
    },
    Repositories,
    Models,
}

impl Command for AgentsCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let fleet = app.fleet()?;
        match self {
            AgentsCommand::List => print_json(&fleet.list().await?),
            AgentsCommand::Running => print_json(&fleet.running().await?),
            AgentsCommand::Status(id) => print_json(&fleet.status(id).await?),
            AgentsCommand::Spawn(spec) => print_json(&fleet.spawn(spec).await?),
            AgentsCommand::Broadcast { ids, message } => {
                let results = fleet.broadcast(ids, message).await;
                print_json(&results_json(&results))?;
                let failed = results.values().filter(|r| r.is_err()).count();
                if failed > 0 {
                    bail!("{failed} of {} follow-ups were not delivered", results.len());
                }
                Ok(())
            }
            AgentsCommand::Wait {
                id,
                interval,
                timeout,
            } => {
                let defaults = app.config.agents.wait;
                let schedule = PollSchedule::from_secs(
                    interval.unwrap_or(defaults.interval.as_secs()),
                    timeout.unwrap_or(defaults.timeout.as_secs()),
                );
                let agent = fleet.wait_for(id, schedule, &app.cancel).await?;
                print_json(&agent)
            }
            AgentsCommand::Repositories => print_json(&fleet.repositories().await?),
            AgentsCommand::Models => print_json(&fleet.models().await?),
        }
    }
}
