use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use super::types::HandoffContext;

/// Envelope format written by this version.
pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("a handoff context for {predecessor_id} already exists")]
    AlreadyExists { predecessor_id: String },

    #[error("no handoff context stored for {predecessor_id}")]
    NotFound { predecessor_id: String },

    #[error("'{key}' cannot be used as a store key")]
    InvalidKey { key: String },

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Durable storage for handoff contexts, keyed by predecessor agent id.
/// Write-once: saving over an existing key fails.
#[async_trait]
pub trait HandoffStore: Send + Sync {
    async fn save(&self, context: &HandoffContext) -> Result<(), StoreError>;
    async fn load(&self, predecessor_id: &str) -> Result<HandoffContext, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredHandoff {
    version: u32,
    written_at: DateTime<Utc>,
    hostname: String,
    context: HandoffContext,
}

/// One JSON file per predecessor under a directory.
#[derive(Debug, Clone)]
pub struct FileHandoffStore {
    dir: PathBuf,
}

impl FileHandoffStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, predecessor_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(predecessor_id)?;
        Ok(self.dir.join(format!("{predecessor_id}.json")))
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
        })
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl HandoffStore for FileHandoffStore {
    async fn save(&self, context: &HandoffContext) -> Result<(), StoreError> {
        let target = self.path_for(&context.predecessor_id)?;
        fs::create_dir_all(&self.dir).await?;

        let envelope = StoredHandoff {
            version: STORE_FORMAT_VERSION,
            written_at: Utc::now(),
            hostname: local_hostname(),
            context: context.clone(),
        };
        let body = serde_json::to_vec_pretty(&envelope)?;

        let temp = self.dir.join(format!(
            ".{}.{}.tmp",
            context.predecessor_id,
            uuid::Uuid::new_v4()
        ));
        fs::write(&temp, &body).await?;

        // Linking fails when the target exists, which keeps the store
        // write-once without a check-then-rename race.
        let linked = fs::hard_link(&temp, &target).await;
        if let Err(e) = fs::remove_file(&temp).await {
            warn!(path = %temp.display(), error = %e, "failed to remove temporary handoff file");
        }
        match linked {
            Ok(()) => {
                info!(
                    predecessor_id = %context.predecessor_id,
                    path = %target.display(),
                    "handoff context persisted"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::AlreadyExists {
                predecessor_id: context.predecessor_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, predecessor_id: &str) -> Result<HandoffContext, StoreError> {
        let path = self.path_for(predecessor_id)?;
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    predecessor_id: predecessor_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: StoredHandoff = serde_json::from_slice(&body)?;
        if envelope.version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: envelope.version,
            });
        }
        debug!(
            predecessor_id,
            written_at = %envelope.written_at,
            hostname = %envelope.hostname,
            "handoff context loaded"
        );
        Ok(envelope.context)
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryHandoffStore {
    contexts: Mutex<HashMap<String, HandoffContext>>,
}

impl MemoryHandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HandoffStore for MemoryHandoffStore {
    async fn save(&self, context: &HandoffContext) -> Result<(), StoreError> {
        validate_key(&context.predecessor_id)?;
        let mut contexts = self.contexts.lock().unwrap_or_else(|p| p.into_inner());
        if contexts.contains_key(&context.predecessor_id) {
            return Err(StoreError::AlreadyExists {
                predecessor_id: context.predecessor_id.clone(),
            });
        }
        contexts.insert(context.predecessor_id.clone(), context.clone());
        Ok(())
    }

    async fn load(&self, predecessor_id: &str) -> Result<HandoffContext, StoreError> {
        self.contexts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(predecessor_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                predecessor_id: predecessor_id.to_string(),
            })
    }
}
