use anyhow::{anyhow, Result};

use super::{print_json, App, Command};
use fleet_control::triage::ResolveOptions;
use fleet_control::RepoRef;

fn parse_repo(input: &str) -> Result<RepoRef> {
    RepoRef::parse(input).ok_or_else(|| anyhow!("'{input}' is not a repository reference"))
}

pub struct TriageCommand {
    pub repository: String,
    pub pr: u64,
}

impl Command for TriageCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let repo = parse_repo(&self.repository)?;
        let engine = app.triage_engine(false)?;
        print_json(&engine.analyze(&repo, self.pr).await?)
    }
}

pub struct ResolveCommand {
    pub repository: String,
    pub pr: u64,
    pub max_iterations: Option<u32>,
    pub request_reviews: bool,
    pub auto_merge: bool,
    pub fix: bool,
    pub escalate: bool,
}

impl Command for ResolveCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let repo = parse_repo(&self.repository)?;
        let engine = app.triage_engine(self.fix)?;

        let mut options = ResolveOptions::from_config(&app.config.triage);
        if let Some(max) = self.max_iterations {
            options.max_iterations = max;
        }
        options.request_reviews = self.request_reviews;
        options.auto_merge = self.auto_merge;

        let report = engine.run_until_ready(&repo, self.pr, options).await?;
        print_json(&report)?;
        if !report.success && self.escalate {
            if let Some(issue) = engine.escalate(&repo, &report.last_triage).await? {
                println!("Escalated to {}", issue.url);
            }
        }
        if !report.success {
            return Err(anyhow!(
                "PR #{} is not ready after {} iteration(s): {}",
                self.pr,
                report.iterations,
                report.final_status
            ));
        }
        Ok(())
    }
}
