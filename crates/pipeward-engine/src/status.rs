//! Status-condition aggregation.
//!
//! Every pass recomputes the descriptor's conditions from live state, in a
//! fixed order, halting at the first unhealthy dependency (later conditions
//! keep their previous value until the next pass). The recomputed status is
//! committed only when it structurally differs from the stored one.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use pipeward_core::{
    Condition, ConditionStatus, ImageStream, PipelineDefinition, PipelineDescriptor,
    REASON_AS_EXPECTED, REASON_INVALID, REASON_KEY_DATA_INVALID, REASON_KEY_NOT_FOUND,
    REASON_NOT_FOUND, TaskDefinition, set_condition,
};
use pipeward_store::{DynStore, Store, StoreExt};

use crate::config::{
    CI_PIPELINE_FILE, EngineConfig, HOSTED_PIPELINE_FILE, RELEASE_PIPELINE_FILE,
};
use crate::dependencies::{SecretCheck, check_secret, secret_requirements};
use crate::error::EngineError;
use crate::git_repo::GitRepoSync;

/// Recomputes and commits descriptor status.
pub struct StatusAggregator {
    store: DynStore,
    config: Arc<EngineConfig>,
}

impl StatusAggregator {
    #[must_use]
    pub fn new(store: DynStore, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Recomputes all conditions against live state and commits the status
    /// when it changed. Returns whether a requeue is wanted.
    ///
    /// # Errors
    ///
    /// Propagates store failures during the checks; a version conflict on
    /// the commit itself is benign and reported as a plain requeue.
    pub async fn commit(&self, descriptor: &PipelineDescriptor) -> Result<bool, EngineError> {
        let namespace = descriptor
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| EngineError::internal("descriptor has no namespace"))?;

        let Some(stored) = self
            .store
            .get_as::<PipelineDescriptor>(Some(namespace), &descriptor.metadata.name)
            .await?
        else {
            return Ok(false);
        };

        let generation = stored.metadata.generation;
        let mut next = stored.clone();
        next.status.observed_generation = generation;

        let mut healthy = self.check_git_repo(&mut next, generation).await;
        if healthy {
            healthy = self.check_secrets(&mut next, namespace, generation).await?;
        }
        if healthy {
            healthy = self.check_pipelines(&mut next, namespace, generation).await?;
        }
        if healthy {
            healthy = self.check_tasks(&mut next, namespace, generation).await?;
        }
        if healthy {
            healthy = self.check_streams(&mut next, namespace, generation).await?;
        }
        let mut requeue = !healthy;

        if next.status == stored.status {
            debug!(name = %stored.metadata.name, "status unchanged, skipping write");
            return Ok(requeue);
        }

        let mut to_write = next;
        match self.store.update_object_status(&mut to_write).await {
            Ok(()) => {}
            Err(e) if e.is_version_conflict() => {
                // Someone wrote in between; the next pass sees fresh state.
                warn!(
                    name = %stored.metadata.name,
                    category = %e.category(),
                    "status commit conflicted, requeueing"
                );
                requeue = true;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(requeue)
    }

    async fn check_git_repo(&self, next: &mut PipelineDescriptor, generation: i64) -> bool {
        let worktree = self.config.worktree_path(&next.spec.release);
        match GitRepoSync::verify_checkout(&worktree, &next.spec.release).await {
            Ok(hash) => {
                next.status.repo_hash = Some(hash);
                record(next, "GitRepoReady", ConditionStatus::True, REASON_AS_EXPECTED,
                    "Git repo is synced", generation)
            }
            Err(EngineError::ReleaseNotFound { release }) => {
                next.status.repo_hash = None;
                record(next, "GitRepoReady", ConditionStatus::False, REASON_NOT_FOUND,
                    format!("Release {release} not found"), generation)
            }
            Err(_) => {
                next.status.repo_hash = None;
                record(next, "GitRepoReady", ConditionStatus::False, REASON_NOT_FOUND,
                    "Local repo is unavailable", generation)
            }
        }
    }

    async fn check_secrets(
        &self,
        next: &mut PipelineDescriptor,
        namespace: &str,
        generation: i64,
    ) -> Result<bool, EngineError> {
        for requirement in secret_requirements(&next.spec, &self.config.secrets) {
            if !requirement.requested {
                record(next, requirement.condition_type, ConditionStatus::True,
                    REASON_AS_EXPECTED, "not requested", generation);
                continue;
            }
            let healthy = match check_secret(
                &self.store,
                namespace,
                &requirement.name,
                &requirement.key,
            )
            .await?
            {
                SecretCheck::Healthy => record(
                    next, requirement.condition_type, ConditionStatus::True,
                    REASON_AS_EXPECTED, "Secret found with valid data", generation,
                ),
                SecretCheck::Missing => record(
                    next, requirement.condition_type, ConditionStatus::False,
                    REASON_NOT_FOUND, format!("Secret {} not found", requirement.name), generation,
                ),
                SecretCheck::KeyNotFound { key } => record(
                    next, requirement.condition_type, ConditionStatus::False,
                    REASON_KEY_NOT_FOUND, format!("Key {key} not found in secret"), generation,
                ),
                SecretCheck::KeyDataInvalid { key } => record(
                    next, requirement.condition_type, ConditionStatus::False,
                    REASON_KEY_DATA_INVALID, format!("Key {key} holds empty data"), generation,
                ),
            };
            if !healthy {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_pipelines(
        &self,
        next: &mut PipelineDescriptor,
        namespace: &str,
        generation: i64,
    ) -> Result<bool, EngineError> {
        let worktree = self.config.worktree_path(&next.spec.release);
        let toggles = [
            ("CiPipelineReady", CI_PIPELINE_FILE, next.spec.apply_ci_pipeline),
            ("HostedPipelineReady", HOSTED_PIPELINE_FILE, next.spec.apply_hosted_pipeline),
            ("ReleasePipelineReady", RELEASE_PIPELINE_FILE, next.spec.apply_release_pipeline),
        ];
        for (condition_type, file, enabled) in toggles {
            if !enabled {
                record(next, condition_type, ConditionStatus::True, REASON_AS_EXPECTED,
                    "not requested", generation);
                continue;
            }
            let path = self.config.pipeline_manifest_path(&worktree, file);
            let healthy = self
                .check_manifest_applied::<PipelineDefinition>(next, condition_type, &path, namespace, generation)
                .await?;
            if !healthy {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_tasks(
        &self,
        next: &mut PipelineDescriptor,
        namespace: &str,
        generation: i64,
    ) -> Result<bool, EngineError> {
        let worktree = self.config.worktree_path(&next.spec.release);
        let tasks_dir = self.config.tasks_dir(&worktree);
        let mut entries = match tokio::fs::read_dir(&tasks_dir).await {
            Ok(entries) => entries,
            Err(_) => {
                return Ok(record(next, "TasksReady", ConditionStatus::False, REASON_NOT_FOUND,
                    "Task manifest directory is unavailable", generation));
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let healthy = self
                .check_manifest_applied::<TaskDefinition>(next, "TasksReady", &entry.path(), namespace, generation)
                .await?;
            if !healthy {
                return Ok(false);
            }
        }
        Ok(record(next, "TasksReady", ConditionStatus::True, REASON_AS_EXPECTED,
            "Tasks are ready", generation))
    }

    async fn check_streams(
        &self,
        next: &mut PipelineDescriptor,
        namespace: &str,
        generation: i64,
    ) -> Result<bool, EngineError> {
        let streams = [
            ("CertifiedIndexReady", &self.config.indices.certified.stream_name),
            ("MarketplaceIndexReady", &self.config.indices.marketplace.stream_name),
        ];
        for (condition_type, stream_name) in streams {
            let healthy = match self
                .store
                .get_as::<ImageStream>(Some(namespace), stream_name)
                .await?
            {
                Some(_) => record(next, condition_type, ConditionStatus::True,
                    REASON_AS_EXPECTED, "Image stream found", generation),
                None => record(next, condition_type, ConditionStatus::False,
                    REASON_NOT_FOUND, format!("Image stream {stream_name} not found"), generation),
            };
            if !healthy {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_manifest_applied<T>(
        &self,
        next: &mut PipelineDescriptor,
        condition_type: &str,
        path: &Path,
        namespace: &str,
        generation: i64,
    ) -> Result<bool, EngineError>
    where
        T: pipeward_core::StoreObject,
    {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(_) => {
                return Ok(record(next, condition_type, ConditionStatus::False, REASON_NOT_FOUND,
                    format!("Manifest {} is unavailable", path.display()), generation));
            }
        };
        let manifest: T = match serde_yaml::from_str(&contents) {
            Ok(manifest) => manifest,
            Err(e) => {
                return Ok(record(next, condition_type, ConditionStatus::False, REASON_INVALID,
                    format!("Manifest {} is malformed: {e}", path.display()), generation));
            }
        };
        let name = &manifest.metadata().name;
        match self.store.get(T::KIND, Some(namespace), name).await? {
            Some(_) => Ok(record(next, condition_type, ConditionStatus::True,
                REASON_AS_EXPECTED, format!("{} {name} is applied", T::KIND), generation)),
            None => Ok(record(next, condition_type, ConditionStatus::False, REASON_NOT_FOUND,
                format!("{} {name} is not applied", T::KIND), generation)),
        }
    }
}

/// Sets the condition and reports whether it came out healthy.
fn record(
    next: &mut PipelineDescriptor,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    generation: i64,
) -> bool {
    set_condition(
        &mut next.status.conditions,
        Condition::unknown(condition_type, generation).with_state(status, reason, message),
    );
    status == ConditionStatus::True
}
