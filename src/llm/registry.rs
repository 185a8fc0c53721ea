use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::{anthropic, openai, LlmError, OutputSchema, StructuredGenerator};
use crate::config::LlmConfig;
use crate::single_flight::SingleFlight;
use crate::tokens::TokenSource;

/// Builds a provider from config and its API key.
pub type ProviderFactory = fn(&LlmConfig, String) -> Result<Arc<dyn StructuredGenerator>, LlmError>;

/// Allowlist of provider identifiers. Only identifiers registered here can be
/// constructed.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, ProviderFactory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.known())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("anthropic", anthropic::factory);
        registry.register("openai", openai::factory);
        registry
    }

    pub fn register(&mut self, provider: &'static str, factory: ProviderFactory) {
        self.factories.insert(provider, factory);
    }

    pub fn known(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(
        &self,
        provider: &str,
        config: &LlmConfig,
        api_key: String,
    ) -> Result<Arc<dyn StructuredGenerator>, LlmError> {
        let factory = self
            .factories
            .get(provider)
            .ok_or_else(|| LlmError::UnknownProvider {
                provider: provider.to_string(),
                known: self.known().join(", "),
            })?;
        factory(config, api_key)
    }
}

/// Lazily constructed providers, one per identifier, built at most once even
/// when requested concurrently. Also usable directly as the configured
/// default generator.
pub struct ModelPool {
    registry: ProviderRegistry,
    config: LlmConfig,
    keys: Arc<dyn TokenSource>,
    providers: SingleFlight<String, Arc<dyn StructuredGenerator>, LlmError>,
}

impl fmt::Debug for ModelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPool")
            .field("registry", &self.registry)
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .finish()
    }
}

impl ModelPool {
    pub fn new(registry: ProviderRegistry, config: LlmConfig, keys: Arc<dyn TokenSource>) -> Self {
        Self {
            registry,
            config,
            keys,
            providers: SingleFlight::new(),
        }
    }

    /// Provider for `provider`, or the configured default.
    pub async fn get(&self, provider: Option<&str>) -> Result<Arc<dyn StructuredGenerator>, LlmError> {
        let provider = provider.unwrap_or(self.config.provider.as_str()).to_string();
        self.providers
            .get_or_init(provider.clone(), || {
                let built = match self.keys.get(&self.config.api_key_env) {
                    Some(key) => self.registry.create(&provider, &self.config, key),
                    None => Err(LlmError::MissingApiKey {
                        env: self.config.api_key_env.clone(),
                    }),
                };
                if built.is_ok() {
                    info!(provider = %provider, model = %self.config.model, "model provider initialized");
                }
                async move { built }
            })
            .await
    }
}

#[async_trait]
impl StructuredGenerator for ModelPool {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, LlmError> {
        self.get(None)
            .await?
            .generate_structured(prompt, schema)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetControlConfig;
    use crate::tokens::StaticTokenSource;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    static BUILDS: AtomicU32 = AtomicU32::new(0);

    struct Echo;

    #[async_trait]
    impl StructuredGenerator for Echo {
        fn provider(&self) -> &str {
            "echo"
        }
        fn model(&self) -> &str {
            "echo-1"
        }
        async fn generate_structured(&self, prompt: &str, _: &OutputSchema) -> Result<Value, LlmError> {
            Ok(json!({ "prompt": prompt }))
        }
    }

    fn echo_factory(_: &LlmConfig, _: String) -> Result<Arc<dyn StructuredGenerator>, LlmError> {
        BUILDS.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Echo))
    }

    fn llm_config(provider: &str) -> LlmConfig {
        let mut config = FleetControlConfig::default().llm;
        config.provider = provider.to_string();
        config.api_key_env = "TEST_LLM_KEY".to_string();
        config
    }

    #[test]
    fn unknown_providers_are_rejected() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.known(), vec!["anthropic", "openai"]);
        let err = registry
            .create("mystery", &llm_config("mystery"), "k".into())
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::UnknownProvider { .. }));
    }

    #[tokio::test]
    async fn pool_builds_each_provider_once() {
        let mut registry = ProviderRegistry::empty();
        registry.register("echo", echo_factory);
        let keys = StaticTokenSource::new().with("TEST_LLM_KEY", "secret");
        let pool = Arc::new(ModelPool::new(registry, llm_config("echo"), Arc::new(keys)));

        let schema = OutputSchema::new("x", "y", json!({"type": "object"}));
        let (a, b) = tokio::join!(
            pool.generate_structured("one", &schema),
            pool.generate_structured("two", &schema),
        );
        assert_eq!(a.unwrap()["prompt"], "one");
        assert_eq!(b.unwrap()["prompt"], "two");
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let pool = ModelPool::new(
            ProviderRegistry::builtin(),
            llm_config("anthropic"),
            Arc::new(StaticTokenSource::new()),
        );
        let err = pool.get(None).await.err().unwrap();
        assert_eq!(err, LlmError::MissingApiKey { env: "TEST_LLM_KEY".into() });
    }
}
