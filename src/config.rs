use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::github::MergeMethod;
use crate::polling::PollSchedule;
use crate::tokens::OrganizationRoute;

/// Main configuration structure for fleet-control
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetControlConfig {
    /// Credential routing
    pub tokens: TokenConfig,
    /// Agent-execution service
    pub agents: AgentServiceConfig,
    /// Pull-request triage and resolution
    pub triage: TriageConfig,
    /// Station-to-station handoff
    pub handoff: HandoffConfig,
    /// Language-model provider
    pub llm: LlmConfig,
    /// Logging
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Explicit organization routes
    #[serde(default)]
    pub organizations: Vec<OrganizationRoute>,
    /// Compact `org:KEY,org2:KEY2` mapping, usually from the environment
    #[serde(default)]
    pub org_tokens: Option<String>,
    /// Credential key used for organizations without a route
    pub default_key: String,
    /// Credential key for every review, comment and merge made as the coordinator
    pub review_identity_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentServiceConfig {
    /// Base URL of the agent-execution API
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Per-request timeout
    pub request_timeout_seconds: u64,
    /// Sustained request rate
    pub requests_per_second: u32,
    /// Burst capacity on top of the sustained rate
    pub burst_capacity: u32,
    /// TTL for cached repository/model listings
    pub listing_cache_seconds: u64,
    /// How long after spawn a 404 is reported as UNKNOWN instead of an error
    pub not_found_grace_seconds: u64,
    /// Default polling for `wait_for`
    pub wait: PollSchedule,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriageConfig {
    pub max_iterations: u32,
    /// Wait applied between iterations while CI is pending
    pub ci_wait: PollSchedule,
    /// Comments posted to request automated reviews
    pub review_requests: Vec<String>,
    /// squash, merge or rebase
    pub merge_method: MergeMethod,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandoffConfig {
    /// Directory of persisted handoff contexts
    pub store_dir: PathBuf,
    /// Successor health polling
    pub health: PollSchedule,
    /// Marker the successor posts once it is healthy
    pub confirmation_marker: String,
    /// Local checkout used for takeover
    pub workspace_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider identifier from the compile-time registry
    pub provider: String,
    pub model: String,
    /// Environment variable holding the provider API key
    pub api_key_env: String,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
    /// Override of the provider API base URL
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for FleetControlConfig {
    fn default() -> Self {
        Self {
            tokens: TokenConfig {
                organizations: Vec::new(),
                org_tokens: None,
                default_key: "GITHUB_TOKEN".to_string(),
                review_identity_key: "GITHUB_REVIEW_TOKEN".to_string(),
            },
            agents: AgentServiceConfig {
                base_url: "https://api.cursor.com".to_string(),
                api_key_env: "AGENT_API_KEY".to_string(),
                request_timeout_seconds: 60,
                requests_per_second: 2,
                burst_capacity: 10,
                listing_cache_seconds: 300,
                not_found_grace_seconds: 120,
                wait: PollSchedule::from_secs(30, 3600),
            },
            triage: TriageConfig {
                max_iterations: 5,
                ci_wait: PollSchedule::from_secs(30, 900),
                review_requests: vec![
                    "/gemini review".to_string(),
                    "@coderabbitai review".to_string(),
                ],
                merge_method: MergeMethod::Squash,
            },
            handoff: HandoffConfig {
                store_dir: PathBuf::from(".fleet-control/handoff"),
                health: PollSchedule::from_secs(15, 600),
                confirmation_marker: "HANDOFF CONFIRMED".to_string(),
                workspace_dir: PathBuf::from("."),
            },
            llm: LlmConfig {
                provider: "anthropic".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
                max_tokens: 4096,
                request_timeout_seconds: 120,
                base_url: None,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl FleetControlConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (fleet-control.toml, .fleet-control-rc)
    /// 3. Environment variables (prefixed with FLEET_CONTROL, `__` between sections)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("fleet-control.toml").exists() {
            builder = builder.add_source(File::with_name("fleet-control"));
        }

        if Path::new(".fleet-control-rc").exists() {
            builder = builder.add_source(File::with_name(".fleet-control-rc").format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEET_CONTROL")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: FleetControlConfig = builder.build()?.try_deserialize()?;

        // The compact org mapping is usually exported on its own
        if loaded.tokens.org_tokens.is_none() {
            if let Ok(raw) = std::env::var("FLEET_CONTROL_ORG_TOKENS") {
                loaded.tokens.org_tokens = Some(raw);
            }
        }

        Ok(loaded)
    }

    /// Load from an explicit TOML file layered over defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()).format(config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
