//! Engine configuration.
//!
//! Loaded from an optional TOML file with serde field defaults; the manifest
//! mount path always comes from the environment and is the one binding whose
//! absence is fatal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Environment variable naming the directory git working trees live under.
pub const ENV_GIT_MOUNT: &str = "PIPEWARD_GIT_MOUNT";

/// Relative location of the pipeline manifests inside a working tree.
pub const PIPELINES_DIR: &str = "manifests/pipelines";
/// Relative location of the task manifests inside a working tree.
pub const TASKS_DIR: &str = "manifests/tasks";
/// Relative location of the shared cluster manifests inside a working tree.
pub const CLUSTER_DIR: &str = "manifests/cluster";

pub const CI_PIPELINE_FILE: &str = "ci-pipeline.yml";
pub const HOSTED_PIPELINE_FILE: &str = "hosted-pipeline.yml";
pub const RELEASE_PIPELINE_FILE: &str = "release-pipeline.yml";
pub const CLUSTER_ROLE_FILE: &str = "pipeline-runner-role.yml";
pub const ROLE_BINDING_FILE: &str = "pipeline-runner-binding.yml";
pub const SECURITY_POLICY_FILE: &str = "pipeline-security-policy.yml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub manifests: ManifestsConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub indices: IndicesConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads configuration from an optional TOML file, then applies the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if the file is unreadable or
    /// malformed, or if validation fails.
    pub fn load(file: Option<&Path>) -> Result<Self, EngineError> {
        let contents = match file {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                EngineError::configuration(format!("cannot read {}: {e}", path.display()))
            })?),
            None => None,
        };
        Self::from_sources(contents.as_deref(), std::env::var(ENV_GIT_MOUNT).ok())
    }

    /// Builds configuration from raw sources. Split out so tests can inject
    /// the environment without touching process state.
    pub fn from_sources(
        file_contents: Option<&str>,
        git_mount: Option<String>,
    ) -> Result<Self, EngineError> {
        let mut config: Self = match file_contents {
            Some(contents) => toml::from_str(contents)
                .map_err(|e| EngineError::configuration(format!("malformed config: {e}")))?,
            None => Self::default(),
        };
        if let Some(mount) = git_mount {
            config.manifests.mount_path = Some(PathBuf::from(mount));
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` naming the first invalid field.
    pub fn validate(&self) -> Result<(), EngineError> {
        match &self.manifests.mount_path {
            None => {
                return Err(EngineError::configuration(format!(
                    "{ENV_GIT_MOUNT} must be set to the manifest mount directory"
                )));
            }
            Some(path) if path.as_os_str().is_empty() => {
                return Err(EngineError::configuration(format!(
                    "{ENV_GIT_MOUNT} must not be empty"
                )));
            }
            Some(_) => {}
        }
        if self.manifests.repo_url.is_empty() {
            return Err(EngineError::configuration("manifests.repo_url must be set"));
        }
        if self.catalog.endpoint.is_empty() {
            return Err(EngineError::configuration("catalog.endpoint must be set"));
        }
        if self.catalog.timeout_secs == 0 {
            return Err(EngineError::configuration("catalog.timeout_secs must be > 0"));
        }
        if self.reconcile.deadline_secs == 0 {
            return Err(EngineError::configuration(
                "reconcile.deadline_secs must be > 0",
            ));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(EngineError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }

    /// Working-tree path for a release: one isolated tree per release value,
    /// so concurrent descriptors pinned to different releases never share
    /// mutable filesystem state.
    #[must_use]
    pub fn worktree_path(&self, release: &str) -> PathBuf {
        let mount = self
            .manifests
            .mount_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        mount.join(format!("manifests-{}", sanitize_release(release)))
    }

    #[must_use]
    pub fn pipeline_manifest_path(&self, worktree: &Path, file: &str) -> PathBuf {
        worktree.join(PIPELINES_DIR).join(file)
    }

    #[must_use]
    pub fn tasks_dir(&self, worktree: &Path) -> PathBuf {
        worktree.join(TASKS_DIR)
    }

    #[must_use]
    pub fn cluster_manifest_path(&self, worktree: &Path, file: &str) -> PathBuf {
        worktree.join(CLUSTER_DIR).join(file)
    }

    #[must_use]
    pub fn reconcile_deadline(&self) -> Duration {
        Duration::from_secs(self.reconcile.deadline_secs)
    }
}

fn sanitize_release(release: &str) -> String {
    release
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestsConfig {
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    /// Base directory for git working trees; supplied by the environment.
    #[serde(default)]
    pub mount_path: Option<PathBuf>,
}

fn default_repo_url() -> String {
    "https://github.com/pipeward/pipeline-manifests.git".into()
}

impl Default for ManifestsConfig {
    fn default() -> Self {
        Self {
            repo_url: default_repo_url(),
            mount_path: None,
        }
    }
}

/// Default names and expected keys for the secrets the pipelines depend on.
///
/// The registry and SSH secrets have no default name: they are optional and
/// checked only when the descriptor names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_kubeconfig_name")]
    pub kubeconfig_name: String,
    #[serde(default = "default_kubeconfig_key")]
    pub kubeconfig_key: String,
    #[serde(default = "default_git_token_name")]
    pub git_token_name: String,
    #[serde(default = "default_git_token_key")]
    pub git_token_key: String,
    #[serde(default = "default_catalog_api_name")]
    pub catalog_api_name: String,
    #[serde(default = "default_catalog_api_key")]
    pub catalog_api_key: String,
    #[serde(default = "default_registry_key")]
    pub registry_key: String,
    #[serde(default = "default_ssh_key")]
    pub ssh_key: String,
}

fn default_kubeconfig_name() -> String {
    "kubeconfig".into()
}
fn default_kubeconfig_key() -> String {
    "kubeconfig".into()
}
fn default_git_token_name() -> String {
    "git-api-token".into()
}
fn default_git_token_key() -> String {
    "GIT_TOKEN".into()
}
fn default_catalog_api_name() -> String {
    "catalog-api-secret".into()
}
fn default_catalog_api_key() -> String {
    "catalog_api_key".into()
}
fn default_registry_key() -> String {
    ".dockerconfigjson".into()
}
fn default_ssh_key() -> String {
    "id_rsa".into()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            kubeconfig_name: default_kubeconfig_name(),
            kubeconfig_key: default_kubeconfig_key(),
            git_token_name: default_git_token_name(),
            git_token_key: default_git_token_key(),
            catalog_api_name: default_catalog_api_name(),
            catalog_api_key: default_catalog_api_key(),
            registry_key: default_registry_key(),
            ssh_key: default_ssh_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_catalog_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_catalog_endpoint() -> String {
    "https://catalog.pipeward.dev/graphql".into()
}
fn default_catalog_timeout_secs() -> u64 {
    60
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: default_catalog_endpoint(),
            timeout_secs: default_catalog_timeout_secs(),
        }
    }
}

/// The two fixed external index identities the engine imports streams for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicesConfig {
    #[serde(default = "default_certified_index")]
    pub certified: IndexIdentity,
    #[serde(default = "default_marketplace_index")]
    pub marketplace: IndexIdentity,
}

impl Default for IndicesConfig {
    fn default() -> Self {
        Self {
            certified: default_certified_index(),
            marketplace: default_marketplace_index(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexIdentity {
    /// Fixed name of the image stream object.
    pub stream_name: String,
    /// Organization identifier used for the catalog lookup.
    pub organization: String,
    /// Image repository the versioned tags are imported from.
    pub image_repo: String,
}

fn default_certified_index() -> IndexIdentity {
    IndexIdentity {
        stream_name: "certified-index".into(),
        organization: "certified-operators".into(),
        image_repo: "registry.pipeward.dev/indices/certified-index".into(),
    }
}

fn default_marketplace_index() -> IndexIdentity {
    IndexIdentity {
        stream_name: "marketplace-index".into(),
        organization: "community-marketplace".into(),
        image_repo: "registry.pipeward.dev/indices/marketplace-index".into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_deadline_secs() -> u64 {
    300
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
