use git2::{
    build::CheckoutBuilder, BranchType, Cred, FetchOptions, RemoteCallbacks, Repository,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::tokens::Credential;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("local branch '{branch}' has diverged from its remote and cannot be fast-forwarded")]
    NotFastForward { branch: String },

    #[error("branch '{name}' already exists")]
    BranchExists { name: String },

    #[error("workspace task failed: {0}")]
    Task(String),
}

/// Local checkout operations needed by takeover.
pub trait Workspace: Send + Sync {
    /// Fetch `branch` from origin, fast-forward the local branch and check it out.
    fn pull_default_branch(&self, credential: &Credential, branch: &str)
        -> Result<(), WorkspaceError>;

    /// Create `name` at HEAD and check it out.
    fn create_branch(&self, name: &str) -> Result<(), WorkspaceError>;
}

/// `git2` backed workspace. The repository is reopened per call so the
/// handle can be shared across threads.
#[derive(Debug, Clone)]
pub struct Git2Workspace {
    path: PathBuf,
}

impl Git2Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Repository, WorkspaceError> {
        Ok(Repository::open(&self.path)?)
    }
}

fn token_callbacks(credential: &Credential) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext("x-access-token", &credential.token)
    });
    callbacks
}

fn checkout(repo: &Repository, refname: &str) -> Result<(), WorkspaceError> {
    repo.set_head(refname)?;
    repo.checkout_head(Some(CheckoutBuilder::new().safe()))?;
    Ok(())
}

impl Workspace for Git2Workspace {
    fn pull_default_branch(
        &self,
        credential: &Credential,
        branch: &str,
    ) -> Result<(), WorkspaceError> {
        let repo = self.open()?;
        let mut remote = repo.find_remote("origin")?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(token_callbacks(credential));
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        remote.fetch(&[refspec.as_str()], Some(&mut fetch_options), None)?;
        debug!(branch, "fetched default branch");

        let upstream = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
        let upstream_commit = repo.reference_to_annotated_commit(&upstream)?;
        let local_ref = format!("refs/heads/{branch}");

        match repo.find_branch(branch, BranchType::Local) {
            Ok(local) => {
                let (analysis, _) = repo.merge_analysis_for_ref(local.get(), &[&upstream_commit])?;
                if analysis.is_fast_forward() {
                    let mut reference = local.into_reference();
                    reference.set_target(upstream_commit.id(), "fast-forward to origin")?;
                } else if !analysis.is_up_to_date() {
                    return Err(WorkspaceError::NotFastForward {
                        branch: branch.to_string(),
                    });
                }
            }
            Err(_) => {
                let commit = repo.find_commit(upstream_commit.id())?;
                repo.branch(branch, &commit, false)?;
            }
        }

        checkout(&repo, &local_ref)?;
        info!(branch, commit = %upstream_commit.id(), "default branch is up to date");
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<(), WorkspaceError> {
        let repo = self.open()?;
        if repo.find_branch(name, BranchType::Local).is_ok() {
            return Err(WorkspaceError::BranchExists {
                name: name.to_string(),
            });
        }
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        checkout(&repo, &format!("refs/heads/{name}"))?;
        info!(branch = name, from = %head.id(), "branch created");
        Ok(())
    }
}
