use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "fleet-control")]
#[command(about = "Coordinate remote coding agents, their pull requests and handoffs")]
#[command(long_about = "fleet-control routes credentials per organization, spawns and monitors \
                       remote coding agents, triages the pull requests they open until they are \
                       ready to merge, and hands in-progress work from one agent to a successor. \
                       Results are printed as JSON on stdout; logs go to stderr.")]
pub struct Cli {
    /// Configuration file (defaults to fleet-control.toml in the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect credential routing
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Spawn, inspect and message remote agents
    Agents {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Run one triage pass over a pull request
    Triage(PrArgs),
    /// Triage and delegate fixes until the pull request is ready or stuck
    Resolve {
        #[command(flatten)]
        pr: PrArgs,
        /// Upper bound on triage passes (defaults to configuration)
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Post the configured review-request comments once ready
        #[arg(long)]
        request_reviews: bool,
        /// Merge once ready
        #[arg(long)]
        auto_merge: bool,
        /// Only triage; never delegate fixes to agents
        #[arg(long)]
        no_fix: bool,
        /// Open an issue for blockers that need a human when the PR is not ready
        #[arg(long)]
        escalate: bool,
    },
    /// Hand in-progress work from one agent to a successor
    Handoff {
        #[command(subcommand)]
        action: HandoffAction,
    },
    /// Fan out to target repositories and fan in through a counterparty agent
    Diamond {
        /// JSON file describing the plan (target_repos, counterparty, control_center)
        plan: PathBuf,
        /// Wait for every spawned agent to finish
        #[arg(long)]
        wait: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PrArgs {
    /// Repository as owner/name or URL
    pub repository: String,
    /// Pull request number
    pub pr: u64,
}

#[derive(Subcommand)]
pub enum TokenAction {
    /// Report credential slots with no value
    Validate {
        /// Organizations to check in addition to the configured ones
        #[arg(long = "org")]
        organizations: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum AgentAction {
    /// List every agent
    List,
    /// List agents that are still creating or running
    Running,
    /// Show one agent
    Status { id: String },
    /// Spawn an agent
    Spawn {
        /// Repository as owner/name or URL
        repository: String,
        /// Task prompt
        prompt: String,
        /// Ref to start from
        #[arg(long = "ref")]
        git_ref: Option<String>,
        /// Branch the agent should push to
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Do not open a pull request automatically
        #[arg(long)]
        no_pr: bool,
    },
    /// Send the same follow-up to several agents
    Broadcast {
        message: String,
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
    },
    /// Wait until an agent finishes
    Wait {
        id: String,
        /// Seconds between checks (defaults to configuration)
        #[arg(long)]
        interval: Option<u64>,
        /// Seconds before giving up (defaults to configuration)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Repositories the agent service can work on
    Repositories,
    /// Models the agent service offers
    Models,
}

#[derive(Subcommand)]
pub enum HandoffAction {
    /// Capture the predecessor's work, persist it and spawn a successor
    Initiate {
        predecessor_id: String,
        /// Repository override (defaults to the predecessor's)
        #[arg(long)]
        repository: Option<String>,
        /// JSON file with fallback tasks used if conversation analysis fails
        #[arg(long)]
        tasks: Option<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        /// Return right after spawning the successor
        #[arg(long)]
        no_wait: bool,
    },
    /// Spawn a successor for an already persisted handoff
    Resume {
        predecessor_id: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        no_wait: bool,
    },
    /// Tell the predecessor that the successor is up
    Confirm {
        predecessor_id: String,
        successor_id: String,
    },
    /// Merge the predecessor's PR and start the successor's own branch
    Takeover {
        predecessor_id: String,
        /// Predecessor pull request number
        pr: u64,
        /// New branch for the successor
        branch: String,
        /// merge, squash or rebase
        #[arg(long, default_value = "squash")]
        merge_method: String,
        /// Merge directly, bypassing branch protection
        #[arg(long)]
        admin: bool,
        /// Enable auto-merge instead of merging now
        #[arg(long)]
        auto: bool,
    },
}
