//! Git-backed manifest repository sync.
//!
//! Maintains one local working tree per release value under the configured
//! mount directory. Each tree is additionally guarded by a process-wide
//! per-path mutex: reconciles for different descriptors pinned to the same
//! release serialize their git work instead of racing on the checkout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use git2::build::CheckoutBuilder;
use git2::{Oid, Repository};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;

static PATH_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    OnceLock::new();

fn path_lock(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let locks = PATH_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks.entry(path.to_path_buf()).or_default().clone()
}

/// Syncs the remote manifest repository into local working trees.
#[derive(Debug, Clone)]
pub struct GitRepoSync {
    repo_url: String,
}

impl GitRepoSync {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            repo_url: config.manifests.repo_url.clone(),
        }
    }

    /// Ensures `worktree` holds a checkout of the reference matching the
    /// release suffix and returns the resolved commit hash.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Git` for clone/fetch/checkout failures and
    /// `EngineError::ReleaseNotFound` when no reference matches.
    pub async fn sync(&self, worktree: &Path, release: &str) -> Result<String, EngineError> {
        let lock = path_lock(worktree);
        let _guard = lock.lock().await;

        let url = self.repo_url.clone();
        let path = worktree.to_path_buf();
        let release = release.to_string();
        let hash = tokio::task::spawn_blocking(move || sync_blocking(&url, &path, &release))
            .await
            .map_err(|e| EngineError::internal(format!("git sync task failed: {e}")))??;

        info!(worktree = %worktree.display(), hash = %hash, "manifest repository synced");
        Ok(hash)
    }

    /// Confirms the working tree is checked out at the commit the release
    /// resolves to and returns that commit's hash.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Git` if the path holds no usable repository or
    /// the checkout does not match, and `EngineError::ReleaseNotFound` when
    /// no reference matches the release.
    pub async fn verify_checkout(worktree: &Path, release: &str) -> Result<String, EngineError> {
        let path = worktree.to_path_buf();
        let release = release.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path)?;
            let expected = resolve_release(&repo, &release)?;
            let head = repo.head()?.peel_to_commit()?.id();
            if head != expected {
                return Err(EngineError::git(format!(
                    "working tree is at {head}, expected {expected}"
                )));
            }
            Ok(expected.to_string())
        })
        .await
        .map_err(|e| EngineError::internal(format!("git inspect task failed: {e}")))?
    }
}

fn sync_blocking(url: &str, path: &Path, release: &str) -> Result<String, EngineError> {
    let repo = match Repository::open(path) {
        Ok(repo) => {
            fetch_all(&repo)?;
            repo
        }
        Err(_) => {
            debug!(url, path = %path.display(), "cloning manifest repository");
            Repository::clone(url, path)?
        }
    };

    let commit = resolve_release(&repo, release)?;
    repo.set_head_detached(commit)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(commit.to_string())
}

fn fetch_all(repo: &Repository) -> Result<(), EngineError> {
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(
        &[
            "+refs/heads/*:refs/remotes/origin/*",
            "+refs/tags/*:refs/tags/*",
        ],
        None,
        None,
    )?;
    Ok(())
}

/// Resolves a release suffix against the repository's references.
///
/// Reference short names are sorted so the selection is deterministic when
/// several references share the suffix; the match is suffix-based, so callers
/// must pass a suffix specific enough to disambiguate.
pub fn resolve_release(repo: &Repository, release: &str) -> Result<Oid, EngineError> {
    let mut names = Vec::new();
    for reference in repo.references()? {
        let reference = reference?;
        if let Some(short) = reference.shorthand() {
            names.push(short.to_string());
        }
    }
    names.sort();

    for name in &names {
        if name.ends_with(release) {
            let reference = repo.resolve_reference_from_short_name(name)?;
            let commit = reference.peel_to_commit()?;
            debug!(reference = %name, release, "resolved release reference");
            return Ok(commit.id());
        }
    }
    Err(EngineError::ReleaseNotFound {
        release: release.to_string(),
    })
}
