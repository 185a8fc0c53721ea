use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::commands::agents::AgentsCommand;
use cli::commands::diamond::DiamondCommand;
use cli::commands::handoff::HandoffCommand;
use cli::commands::tokens::ValidateTokensCommand;
use cli::commands::triage::{ResolveCommand, TriageCommand};
use cli::commands::{App, Command};
use cli::{AgentAction, Cli, Commands, HandoffAction, TokenAction};
use fleet_control::fleet::SpawnSpec;
use fleet_control::{init_telemetry, FleetControlConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    FleetControlConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => FleetControlConfig::load_from(path)?,
        None => FleetControlConfig::load()?,
    };
    init_telemetry(
        &config.observability.log_level,
        cli.json_logs || config.observability.json,
    )?;

    tokio::runtime::Runtime::new()?.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling waits");
                on_interrupt.cancel();
            }
        });

        let app = App::new(config, cancel);
        run(cli.command, &app).await
    })
}

async fn run(command: Commands, app: &App) -> Result<()> {
    match command {
        Commands::Tokens {
            action: TokenAction::Validate { organizations },
        } => ValidateTokensCommand { organizations }.execute(app).await,

        Commands::Agents { action } => {
            let command = match action {
                AgentAction::List => AgentsCommand::List,
                AgentAction::Running => AgentsCommand::Running,
                AgentAction::Status { id } => AgentsCommand::Status(id),
                AgentAction::Spawn {
                    repository,
                    prompt,
                    git_ref,
                    branch,
                    model,
                    no_pr,
                } => {
                    let mut spec = SpawnSpec::new(repository, prompt).with_model(model);
                    spec.git_ref = git_ref;
                    spec.branch_name = branch;
                    spec.auto_create_pr = !no_pr;
                    AgentsCommand::Spawn(spec)
                }
                AgentAction::Broadcast { message, ids } => AgentsCommand::Broadcast { ids, message },
                AgentAction::Wait {
                    id,
                    interval,
                    timeout,
                } => AgentsCommand::Wait {
                    id,
                    interval,
                    timeout,
                },
                AgentAction::Repositories => AgentsCommand::Repositories,
                AgentAction::Models => AgentsCommand::Models,
            };
            command.execute(app).await
        }

        Commands::Triage(pr) => {
            TriageCommand {
                repository: pr.repository,
                pr: pr.pr,
            }
            .execute(app)
            .await
        }

        Commands::Resolve {
            pr,
            max_iterations,
            request_reviews,
            auto_merge,
            no_fix,
            escalate,
        } => {
            ResolveCommand {
                repository: pr.repository,
                pr: pr.pr,
                max_iterations,
                request_reviews,
                auto_merge,
                fix: !no_fix,
                escalate,
            }
            .execute(app)
            .await
        }

        Commands::Handoff { action } => {
            let command = match action {
                HandoffAction::Initiate {
                    predecessor_id,
                    repository,
                    tasks,
                    model,
                    no_wait,
                } => HandoffCommand::Initiate {
                    predecessor_id,
                    repository,
                    tasks,
                    model,
                    no_wait,
                },
                HandoffAction::Resume {
                    predecessor_id,
                    model,
                    no_wait,
                } => HandoffCommand::Resume {
                    predecessor_id,
                    model,
                    no_wait,
                },
                HandoffAction::Confirm {
                    predecessor_id,
                    successor_id,
                } => HandoffCommand::Confirm {
                    predecessor_id,
                    successor_id,
                },
                HandoffAction::Takeover {
                    predecessor_id,
                    pr,
                    branch,
                    merge_method,
                    admin,
                    auto,
                } => HandoffCommand::Takeover {
                    predecessor_id,
                    pr,
                    branch,
                    merge_method,
                    admin,
                    auto,
                },
            };
            command.execute(app).await
        }

        Commands::Diamond { plan, wait } => DiamondCommand { plan, wait }.execute(app).await,
    }
}
