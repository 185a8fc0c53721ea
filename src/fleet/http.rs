use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{AgentService, AgentServiceError};
use super::types::{Agent, Conversation, Repository, SpawnSpec};
use crate::config::AgentServiceConfig;
use crate::tokens::RepoRef;

/// Rate-limited REST client for the background-agent API.
#[derive(Debug)]
pub struct HttpAgentService {
    http: Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    repositories: Cache<(), Vec<Repository>>,
    models: Cache<(), Vec<String>>,
}

#[derive(Deserialize)]
struct AgentList {
    #[serde(default)]
    agents: Vec<Agent>,
}

#[derive(Deserialize)]
struct RepositoryList {
    #[serde(default)]
    repositories: Vec<Repository>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<String>,
}

impl HttpAgentService {
    pub fn new(config: &AgentServiceConfig, api_key: String) -> Result<Self, AgentServiceError> {
        if api_key.trim().is_empty() {
            return Err(AgentServiceError::NotConfigured(format!(
                "{} is empty",
                config.api_key_env
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("fleet-control/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentServiceError::NotConfigured(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_capacity).unwrap_or(per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(
            Quota::per_second(per_second).allow_burst(burst),
        ));

        let ttl = Duration::from_secs(config.listing_cache_seconds);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter,
            repositories: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
            models: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        })
    }

    /// Build from config, reading the API key from its environment variable.
    pub fn from_env(config: &AgentServiceConfig) -> Result<Self, AgentServiceError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AgentServiceError::NotConfigured(format!("{} is not set", config.api_key_env))
        })?;
        Self::new(config, api_key)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        subject: &str,
        request: RequestBuilder,
    ) -> Result<T, AgentServiceError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        debug!(operation, subject, "agent service request");
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(operation, status = status.as_u16(), "agent service request failed");
            return Err(classify_status(status, subject, message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AgentServiceError::Decode(format!("{operation}: {e}")))
    }
}

/// The service wants full repository URLs.
pub fn repository_url(repository: &str) -> String {
    if repository.starts_with("http://") || repository.starts_with("https://") {
        return repository.to_string();
    }
    match RepoRef::parse(repository) {
        Some(repo) if !repository.contains('@') => format!("https://github.com/{}", repo.slug()),
        _ => repository.to_string(),
    }
}

fn classify_transport(operation: &str, error: reqwest::Error) -> AgentServiceError {
    if error.is_timeout() {
        AgentServiceError::Timeout {
            operation: operation.to_string(),
        }
    } else if error.is_decode() {
        AgentServiceError::Decode(error.to_string())
    } else {
        AgentServiceError::Network(error.to_string())
    }
}

fn classify_status(status: StatusCode, subject: &str, message: String) -> AgentServiceError {
    match status {
        StatusCode::NOT_FOUND => AgentServiceError::NotFound {
            id: subject.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentServiceError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => AgentServiceError::RateLimited,
        _ => AgentServiceError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl AgentService for HttpAgentService {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Agent, AgentServiceError> {
        let mut body = json!({
            "prompt": { "text": spec.prompt },
            "source": { "repository": repository_url(&spec.repository) },
            "target": { "autoCreatePr": spec.auto_create_pr },
        });
        if let Some(git_ref) = &spec.git_ref {
            body["source"]["ref"] = json!(git_ref);
        }
        if let Some(branch) = &spec.branch_name {
            body["target"]["branchName"] = json!(branch);
        }
        if let Some(model) = &spec.model {
            body["model"] = json!(model);
        }

        self.send(
            "spawn",
            &spec.repository,
            self.request(Method::POST, "/v0/agents").json(&body),
        )
        .await
    }

    async fn status(&self, id: &str) -> Result<Agent, AgentServiceError> {
        self.send("status", id, self.request(Method::GET, &format!("/v0/agents/{id}")))
            .await
    }

    async fn list(&self) -> Result<Vec<Agent>, AgentServiceError> {
        let list: AgentList = self
            .send("list", "agents", self.request(Method::GET, "/v0/agents"))
            .await?;
        Ok(list.agents)
    }

    async fn conversation(&self, id: &str) -> Result<Conversation, AgentServiceError> {
        self.send(
            "conversation",
            id,
            self.request(Method::GET, &format!("/v0/agents/{id}/conversation")),
        )
        .await
    }

    async fn followup(&self, id: &str, text: &str) -> Result<(), AgentServiceError> {
        let _: serde_json::Value = self
            .send(
                "followup",
                id,
                self.request(Method::POST, &format!("/v0/agents/{id}/followup"))
                    .json(&json!({ "prompt": { "text": text } })),
            )
            .await?;
        Ok(())
    }

    async fn repositories(&self) -> Result<Vec<Repository>, AgentServiceError> {
        self.repositories
            .try_get_with((), async {
                let list: RepositoryList = self
                    .send("repositories", "repositories", self.request(Method::GET, "/v0/repositories"))
                    .await?;
                Ok::<_, AgentServiceError>(list.repositories)
            })
            .await
            .map_err(|e| (*e).clone())
    }

    async fn models(&self) -> Result<Vec<String>, AgentServiceError> {
        self.models
            .try_get_with((), async {
                let list: ModelList = self
                    .send("models", "models", self.request(Method::GET, "/v0/models"))
                    .await?;
                Ok::<_, AgentServiceError>(list.models)
            })
            .await
            .map_err(|e| (*e).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_repository_references() {
        assert_eq!(repository_url("acme/widgets"), "https://github.com/acme/widgets");
        assert_eq!(
            repository_url("https://github.com/acme/widgets"),
            "https://github.com/acme/widgets"
        );
        assert_eq!(repository_url("git@github.com:acme/widgets.git"), "git@github.com:acme/widgets.git");
    }

    #[test]
    fn classifies_http_statuses() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "bc-1", String::new()),
            AgentServiceError::NotFound { id: "bc-1".into() }
        );
        assert!(classify_status(StatusCode::BAD_GATEWAY, "x", String::new()).is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "x", String::new()).is_transient());
    }
}
