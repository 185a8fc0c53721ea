use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::org::extract_organization;
use crate::config::TokenConfig;

/// Fallback credential key when nothing else is configured.
pub const DEFAULT_TOKEN_KEY: &str = "GITHUB_TOKEN";
/// Fallback key for the review identity.
pub const DEFAULT_REVIEW_TOKEN_KEY: &str = "GITHUB_REVIEW_TOKEN";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no credential found in {key} for organization '{organization}'")]
    MissingToken { organization: String, key: String },
    #[error("review identity credential {key} is not set; refusing to act under another identity")]
    ReviewIdentityMissing { key: String },
    #[error("'{reference}' does not name an organization or repository")]
    InvalidReference { reference: String },
}

/// Routing entry for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRoute {
    pub name: String,
    pub token_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub is_enterprise: bool,
}

impl OrganizationRoute {
    pub fn new(name: impl Into<String>, token_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token_key: token_key.into(),
            default_branch: None,
            is_enterprise: false,
        }
    }
}

/// Immutable snapshot of organization routes. Readers hold an `Arc` to one
/// snapshot; writers publish a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    routes: HashMap<String, OrganizationRoute>,
    pub default_key: String,
    pub review_identity_key: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            default_key: DEFAULT_TOKEN_KEY.to_string(),
            review_identity_key: DEFAULT_REVIEW_TOKEN_KEY.to_string(),
        }
    }
}

impl RouteTable {
    pub fn new(default_key: impl Into<String>, review_identity_key: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            default_key: default_key.into(),
            review_identity_key: review_identity_key.into(),
        }
    }

    pub fn from_config(config: &TokenConfig) -> Self {
        let mut table = Self::new(&config.default_key, &config.review_identity_key);
        for route in &config.organizations {
            table.upsert(route.clone());
        }
        for route in parse_org_token_list(config.org_tokens.as_deref().unwrap_or_default()) {
            table.upsert(route);
        }
        table
    }

    /// Last write for an organization wins.
    pub fn upsert(&mut self, route: OrganizationRoute) {
        self.routes.insert(route.name.to_lowercase(), route);
    }

    pub fn get(&self, organization: &str) -> Option<&OrganizationRoute> {
        self.routes.get(&organization.to_lowercase())
    }

    pub fn routes(&self) -> impl Iterator<Item = &OrganizationRoute> {
        self.routes.values()
    }
}

/// Parse the compact `org:KEY,org2:KEY2` form.
pub fn parse_org_token_list(raw: &str) -> Vec<OrganizationRoute> {
    raw.split(',')
        .filter_map(|pair| {
            let (org, key) = pair.split_once(':')?;
            let (org, key) = (org.trim(), key.trim());
            if org.is_empty() || key.is_empty() {
                warn!(entry = %pair, "ignoring malformed organization token mapping");
                return None;
            }
            Some(OrganizationRoute::new(org, key))
        })
        .collect()
}

/// Source of credential values by key name.
pub trait TokenSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads credential keys as environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvTokenSource;

impl TokenSource for EnvTokenSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}

/// Fixed key/value source, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenSource {
    values: HashMap<String, String>,
}

impl StaticTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl TokenSource for StaticTokenSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// A resolved credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.key)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// One slot whose credential is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCredential {
    pub slot: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenValidation {
    pub missing: Vec<MissingCredential>,
}

impl TokenValidation {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Resolves which credential to use per organization and for the review
/// identity.
pub struct TokenRouter {
    table: RwLock<Arc<RouteTable>>,
    baseline: RouteTable,
    source: Arc<dyn TokenSource>,
}

impl fmt::Debug for TokenRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRouter")
            .field("table", &self.snapshot())
            .finish()
    }
}

impl TokenRouter {
    pub fn new(table: RouteTable, source: Arc<dyn TokenSource>) -> Self {
        Self {
            table: RwLock::new(Arc::new(table.clone())),
            baseline: table,
            source,
        }
    }

    pub fn from_env(config: &TokenConfig) -> Self {
        Self::new(RouteTable::from_config(config), Arc::new(EnvTokenSource))
    }

    /// Current routing snapshot. Never observes a half-applied update.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        match self.table.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arc<RouteTable>> {
        match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, table: RouteTable) {
        *self.write() = Arc::new(table);
    }

    /// Copy, edit and swap under one write guard so concurrent edits never
    /// overwrite each other.
    fn update(&self, edit: impl FnOnce(&mut RouteTable)) {
        let mut guard = self.write();
        let mut next = RouteTable::clone(&guard);
        edit(&mut next);
        *guard = Arc::new(next);
    }

    /// Upsert one organization route.
    pub fn configure(&self, route: OrganizationRoute) {
        info!(organization = %route.name, key = %route.token_key, "organization route configured");
        self.update(|table| table.upsert(route));
    }

    /// Replace the whole table.
    pub fn replace(&self, table: RouteTable) {
        self.publish(table);
    }

    /// Restore the table this router was created with.
    pub fn reset(&self) {
        self.publish(self.baseline.clone());
    }

    pub fn set_default_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.update(|table| table.default_key = key);
    }

    pub fn set_review_identity_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.update(|table| table.review_identity_key = key);
    }

    /// Credential key name for an organization or repository reference.
    pub fn resolve_key(&self, org_or_repo: &str) -> String {
        let table = self.snapshot();
        match extract_organization(org_or_repo).and_then(|org| table.get(&org).cloned()) {
            Some(route) => route.token_key,
            None => table.default_key.clone(),
        }
    }

    pub fn resolve_token(&self, org_or_repo: &str) -> Option<String> {
        self.source.get(&self.resolve_key(org_or_repo))
    }

    pub fn review_identity_token(&self) -> Option<String> {
        self.source.get(&self.snapshot().review_identity_key)
    }

    /// Configured default branch for the organization, if any.
    pub fn default_branch(&self, org_or_repo: &str) -> Option<String> {
        let org = extract_organization(org_or_repo)?;
        self.snapshot().get(&org)?.default_branch.clone()
    }

    /// Organization-appropriate credential. Fails rather than guessing.
    pub fn credential_for(&self, org_or_repo: &str) -> Result<Credential, TokenError> {
        let organization =
            extract_organization(org_or_repo).ok_or_else(|| TokenError::InvalidReference {
                reference: org_or_repo.to_string(),
            })?;
        let key = self.resolve_key(&organization);
        debug!(organization = %organization, key = %key, "resolving organization credential");
        match self.source.get(&key) {
            Some(token) => Ok(Credential { key, token }),
            None => Err(TokenError::MissingToken { organization, key }),
        }
    }

    /// Credential for every review, comment and merge performed as the
    /// coordinator itself.
    pub fn review_credential(&self) -> Result<Credential, TokenError> {
        let key = self.snapshot().review_identity_key.clone();
        match self.source.get(&key) {
            Some(token) => Ok(Credential { key, token }),
            None => Err(TokenError::ReviewIdentityMissing { key }),
        }
    }

    /// Report every slot whose credential is absent. No network calls.
    pub fn validate_all(&self, organizations: Option<&[String]>) -> TokenValidation {
        let table = self.snapshot();
        let mut missing = Vec::new();

        let mut names: Vec<String> = match organizations {
            Some(orgs) => orgs.to_vec(),
            None => table.routes().map(|route| route.name.clone()).collect(),
        };
        names.sort();
        names.dedup();

        for name in names {
            let key = self.resolve_key(&name);
            if self.source.get(&key).is_none() {
                missing.push(MissingCredential { slot: name, key });
            }
        }
        if self.source.get(&table.default_key).is_none() {
            missing.push(MissingCredential {
                slot: "default".to_string(),
                key: table.default_key.clone(),
            });
        }
        if self.source.get(&table.review_identity_key).is_none() {
            missing.push(MissingCredential {
                slot: "review_identity".to_string(),
                key: table.review_identity_key.clone(),
            });
        }

        TokenValidation { missing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TokenRouter {
        let mut table = RouteTable::new("GITHUB_TOKEN", "REVIEW_TOKEN");
        table.upsert(OrganizationRoute::new("Acme", "ACME_TOKEN"));
        let source = StaticTokenSource::new()
            .with("GITHUB_TOKEN", "default-secret")
            .with("ACME_TOKEN", "acme-secret")
            .with("REVIEW_TOKEN", "review-secret");
        TokenRouter::new(table, Arc::new(source))
    }

    #[test]
    fn resolves_case_insensitively_from_any_reference() {
        let router = router();
        assert_eq!(router.resolve_key("acme"), "ACME_TOKEN");
        assert_eq!(router.resolve_key("ACME"), "ACME_TOKEN");
        assert_eq!(router.resolve_key("https://github.com/AcMe/widgets"), "ACME_TOKEN");
        assert_eq!(router.resolve_key("git@github.com:acme/widgets.git"), "ACME_TOKEN");
        assert_eq!(router.resolve_key("other/repo"), "GITHUB_TOKEN");
        assert_eq!(router.resolve_token("acme/x").as_deref(), Some("acme-secret"));
    }

    #[test]
    fn last_configure_wins() {
        let router = router();
        router.configure(OrganizationRoute::new("ACME", "ACME_TOKEN_V2"));
        assert_eq!(router.resolve_key("acme"), "ACME_TOKEN_V2");
        router.reset();
        assert_eq!(router.resolve_key("acme"), "ACME_TOKEN");
    }

    #[test]
    fn concurrent_edits_are_all_kept_and_reads_stay_consistent() {
        let router = Arc::new(router());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let router = Arc::clone(&router);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let key = router.resolve_key("acme/widgets");
                        assert_eq!(key, "ACME_TOKEN");
                        let table = router.snapshot();
                        assert!(table.default_key.starts_with("DEFAULT_") || table.default_key == "GITHUB_TOKEN");
                    }
                })
            })
            .collect();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let router = Arc::clone(&router);
                std::thread::spawn(move || {
                    for round in 0..200 {
                        router.configure(OrganizationRoute::new(format!("org-{i}-{round}"), "ORG_TOKEN"));
                        router.set_default_key(format!("DEFAULT_{i}"));
                        router.set_review_identity_key(format!("REVIEW_{i}"));
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        let table = router.snapshot();
        for i in 0..8 {
            for round in 0..200 {
                assert!(table.get(&format!("org-{i}-{round}")).is_some());
            }
        }
        assert_eq!(table.routes().count(), 8 * 200 + 1);
    }

    #[test]
    fn review_identity_is_separate_and_mandatory() {
        let router = router();
        let review = router.review_credential().unwrap();
        assert_eq!(review.key, "REVIEW_TOKEN");
        assert_eq!(review.token, "review-secret");

        router.set_review_identity_key("UNSET_REVIEW_TOKEN");
        assert_eq!(
            router.review_credential(),
            Err(TokenError::ReviewIdentityMissing {
                key: "UNSET_REVIEW_TOKEN".to_string()
            })
        );
    }

    #[test]
    fn missing_org_credential_fails_fast() {
        let router = router();
        router.configure(OrganizationRoute::new("ghost", "GHOST_TOKEN"));
        let err = router.credential_for("ghost/repo").unwrap_err();
        assert_eq!(
            err,
            TokenError::MissingToken {
                organization: "ghost".to_string(),
                key: "GHOST_TOKEN".to_string()
            }
        );
        assert!(matches!(
            router.credential_for("::not a repo::"),
            Err(TokenError::InvalidReference { .. })
        ));
    }

    #[test]
    fn validate_all_reports_every_missing_slot() {
        let table = RouteTable::new("DEFAULT_KEY", "REVIEW_KEY");
        let router = TokenRouter::new(table, Arc::new(StaticTokenSource::new()));
        router.configure(OrganizationRoute::new("alpha", "ALPHA_KEY"));

        let report = router.validate_all(None);
        let slots: Vec<_> = report.missing.iter().map(|m| m.slot.as_str()).collect();
        assert_eq!(slots, vec!["alpha", "default", "review_identity"]);
        assert!(!report.is_ok());

        let report = router.validate_all(Some(&["beta".to_string()]));
        assert_eq!(report.missing[0].key, "DEFAULT_KEY");
    }

    #[test]
    fn parses_compact_org_mapping() {
        let routes = parse_org_token_list("acme:ACME_TOKEN, beta : BETA_TOKEN,broken,:x");
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1], OrganizationRoute::new("beta", "BETA_TOKEN"));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = router().credential_for("acme").unwrap();
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("acme-secret"));
    }
}
