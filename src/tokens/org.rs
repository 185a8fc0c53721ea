//! Organization and repository extraction from loosely formatted references.
//!
//! Accepted forms: `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo`,
//! `git@host:owner/repo(.git)`, `owner/repo` and a bare `owner`. Patterns use
//! bounded character classes and the `regex` crate's linear-time engine, so
//! adversarial input cannot cause catastrophic backtracking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// References longer than this are rejected without matching.
pub const MAX_REFERENCE_LEN: usize = 2048;

static URL_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?|ssh|git)://(?:[A-Za-z0-9._-]{1,64}@)?[A-Za-z0-9.-]{1,253}(?::[0-9]{1,5})?/([A-Za-z0-9][A-Za-z0-9_.-]{0,38})(?:/([A-Za-z0-9._-]{1,100}?)(?:\.git)?)?/?(?:[/?#].{0,1024})?$",
    )
    .expect("static URL pattern compiles")
});

static SCP_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9._-]{1,64}@[A-Za-z0-9.-]{1,253}:([A-Za-z0-9][A-Za-z0-9_.-]{0,38})(?:/([A-Za-z0-9._-]{1,100}?)(?:\.git)?)?/?$",
    )
    .expect("static SSH pattern compiles")
});

static SLUG_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_.-]{0,38})(?:/([A-Za-z0-9._-]{1,100}?)(?:\.git)?)?$")
        .expect("static slug pattern compiles")
});

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse any accepted reference form that includes a repository name.
    pub fn parse(reference: &str) -> Option<Self> {
        let (owner, name) = split_reference(reference)?;
        let name = name?;
        if name == "." || name == ".." {
            return None;
        }
        Some(Self { owner, name })
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Same repository, ignoring case as the platform does.
    pub fn same_as(&self, other: &RepoRef) -> bool {
        self.owner.eq_ignore_ascii_case(&other.owner) && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Organization (owner) named by a reference, or `None` when the input is
/// not a recognizable reference.
pub fn extract_organization(reference: &str) -> Option<String> {
    split_reference(reference).map(|(owner, _)| owner)
}

fn split_reference(reference: &str) -> Option<(String, Option<String>)> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_REFERENCE_LEN {
        return None;
    }

    let captures = if trimmed.contains("://") {
        URL_FORM.captures(trimmed)?
    } else if trimmed.contains('@') && trimmed.contains(':') {
        SCP_FORM.captures(trimmed)?
    } else {
        SLUG_FORM.captures(trimmed)?
    };

    let owner = captures.get(1)?.as_str().to_string();
    let name = captures.get(2).map(|m| m.as_str().to_string());
    Some((owner, name))
}
