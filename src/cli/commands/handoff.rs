use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use super::{print_json, App, Command};
use fleet_control::github::MergeMethod;
use fleet_control::handoff::{HandoffOptions, TakeoverOptions};
use fleet_control::triage::Task;

pub enum HandoffCommand {
    Initiate {
        predecessor_id: String,
        repository: Option<String>,
        tasks: Option<PathBuf>,
        model: Option<String>,
        no_wait: bool,
    },
    Resume {
        predecessor_id: String,
        model: Option<String>,
        no_wait: bool,
    },
    Confirm {
        predecessor_id: String,
        successor_id: String,
    },
    Takeover {
        predecessor_id: String,
        pr: u64,
        branch: String,
        merge_method: String,
        admin: bool,
        auto: bool,
    },
}

async fn read_tasks(path: &PathBuf) -> Result<Vec<Task>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON task list", path.display()))
}

impl Command for HandoffCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let coordinator = app.handoff()?;
        match self {
            HandoffCommand::Initiate {
                predecessor_id,
                repository,
                tasks,
                model,
                no_wait,
            } => {
                let fallback_tasks = match tasks {
                    Some(path) => read_tasks(path).await?,
                    None => Vec::new(),
                };
                let options = HandoffOptions {
                    repository: repository.clone(),
                    fallback_tasks,
                    model: model.clone(),
                    skip_health_wait: *no_wait,
                };
                let outcome = coordinator.initiate_handoff(predecessor_id, &options).await?;
                print_json(&outcome)?;
                match &outcome.error {
                    Some(error) => Err(anyhow!("handoff stopped at {}: {error}", outcome.phase)),
                    None => Ok(()),
                }
            }
            HandoffCommand::Resume {
                predecessor_id,
                model,
                no_wait,
            } => {
                let options = HandoffOptions {
                    model: model.clone(),
                    skip_health_wait: *no_wait,
                    ..HandoffOptions::default()
                };
                let outcome = coordinator.resume_handoff(predecessor_id, &options).await?;
                print_json(&outcome)?;
                match &outcome.error {
                    Some(error) => Err(anyhow!("handoff stopped at {}: {error}", outcome.phase)),
                    None => Ok(()),
                }
            }
            HandoffCommand::Confirm {
                predecessor_id,
                successor_id,
            } => {
                coordinator.confirm_health(predecessor_id, successor_id).await?;
                print_json(&serde_json::json!({
                    "success": true,
                    "predecessor_id": predecessor_id,
                    "successor_id": successor_id,
                }))
            }
            HandoffCommand::Takeover {
                predecessor_id,
                pr,
                branch,
                merge_method,
                admin,
                auto,
            } => {
                let options = TakeoverOptions {
                    merge_method: merge_method.parse::<MergeMethod>().map_err(anyhow::Error::msg)?,
                    admin: *admin,
                    auto: *auto,
                };
                let report = coordinator
                    .takeover(predecessor_id, *pr, branch, options)
                    .await?;
                print_json(&report)
            }
        }
    }
}
