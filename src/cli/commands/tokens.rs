use anyhow::{bail, Result};

use super::{print_json, App, Command};

pub struct ValidateTokensCommand {
    /// Checked in addition to every routed organization.
    pub organizations: Vec<String>,
}

impl Command for ValidateTokensCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let mut organizations: Vec<String> = app
            .router
            .snapshot()
            .routes()
            .map(|route| route.name.clone())
            .collect();
        organizations.extend(self.organizations.iter().cloned());

        let validation = app.router.validate_all(Some(&organizations));
        print_json(&validation)?;
        if !validation.is_ok() {
            bail!("{} credential slot(s) have no value", validation.missing.len());
        }
        Ok(())
    }
}
