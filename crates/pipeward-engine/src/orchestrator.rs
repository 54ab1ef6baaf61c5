//! The top-level reconcile loop.
//!
//! One invocation per change event: fetch the descriptor, branch on its
//! lifecycle state, run the sub-reconcilers in fixed order, and always
//! attempt a status commit before returning. The status write is the
//! guaranteed release step on every exit path of an active pass.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use pipeward_core::{
    ClusterRole, DESCRIPTOR_FINALIZER, OwnerReference, PipelineDefinition, PipelineDescriptor,
    SecurityPolicy, StoreObject, TaskDefinition,
};
use pipeward_store::{DynStore, StoreExt};

use crate::catalog::DynCatalogClient;
use crate::config::{
    CI_PIPELINE_FILE, CLUSTER_ROLE_FILE, EngineConfig, HOSTED_PIPELINE_FILE,
    RELEASE_PIPELINE_FILE, ROLE_BINDING_FILE, SECURITY_POLICY_FILE,
};
use crate::dependencies::{ImageStreamReconciler, SecretsReconciler};
use crate::error::EngineError;
use crate::git_repo::GitRepoSync;
use crate::manifests::{ManifestReconciler, Scope};
use crate::shared::SharedResourceLifecycle;
use crate::status::StatusAggregator;

/// One step of the reconcile sequence.
///
/// Returns whether the step wants a requeue even on success; an error halts
/// the sequence and is the error the whole pass reports.
#[async_trait]
pub trait SubReconciler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, descriptor: &mut PipelineDescriptor) -> Result<bool, EngineError>;
}

/// Result of a successful reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The pass wants to run again without waiting for a change event.
    pub requeue: bool,
}

/// Runs the full reconcile sequence for one descriptor identity.
pub struct ReconcileOrchestrator {
    store: DynStore,
    config: Arc<EngineConfig>,
    reconcilers: Vec<Box<dyn SubReconciler>>,
    status: StatusAggregator,
    lifecycle: SharedResourceLifecycle,
}

impl ReconcileOrchestrator {
    #[must_use]
    pub fn new(store: DynStore, config: Arc<EngineConfig>, catalog: DynCatalogClient) -> Self {
        let reconcilers: Vec<Box<dyn SubReconciler>> = vec![
            Box::new(GitRepoReconciler::new(config.clone())),
            Box::new(ManifestApplyReconciler::new(store.clone(), config.clone())),
            Box::new(SecretsReconciler::new(store.clone(), config.clone())),
            Box::new(ImageStreamReconciler::certified(
                store.clone(),
                catalog.clone(),
                &config,
            )),
            Box::new(ImageStreamReconciler::marketplace(
                store.clone(),
                catalog,
                &config,
            )),
        ];
        Self::with_reconcilers(store, config, reconcilers)
    }

    fn with_reconcilers(
        store: DynStore,
        config: Arc<EngineConfig>,
        reconcilers: Vec<Box<dyn SubReconciler>>,
    ) -> Self {
        Self {
            status: StatusAggregator::new(store.clone(), config.clone()),
            lifecycle: SharedResourceLifecycle::new(store.clone()),
            store,
            config,
            reconcilers,
        }
    }

    /// Runs one reconcile pass for the descriptor identity.
    ///
    /// # Errors
    ///
    /// Returns the first sub-reconciler error of the pass; the caller is
    /// expected to requeue with backoff on any error.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, EngineError> {
        let Some(mut descriptor) = self
            .store
            .get_as::<PipelineDescriptor>(Some(namespace), name)
            .await?
        else {
            debug!("descriptor is gone, nothing to reconcile");
            return Ok(ReconcileOutcome { requeue: false });
        };

        if descriptor.metadata.is_terminating() {
            return self.reconcile_terminating(descriptor).await;
        }

        let mut requeue = false;
        let mut first_error = None;
        for sub in &self.reconcilers {
            match sub.reconcile(&mut descriptor).await {
                Ok(wants_requeue) => requeue |= wants_requeue,
                Err(e) => {
                    warn!(step = sub.name(), error = %e, "sub-reconciler failed, halting pass");
                    first_error = Some(e);
                    break;
                }
            }
        }

        // Best-effort status commit on every exit path.
        match self.status.commit(&descriptor).await {
            Ok(wants_requeue) => requeue |= wants_requeue,
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(error = %e, "status commit failed after an earlier error");
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        self.ensure_finalizer(namespace, name).await?;
        Ok(ReconcileOutcome { requeue })
    }

    /// Runs one pass bounded by the configured deadline.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DeadlineExceeded` when the deadline expires;
    /// the expiry is transient and retried with backoff.
    pub async fn reconcile_with_deadline(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, EngineError> {
        match tokio::time::timeout(
            self.config.reconcile_deadline(),
            self.reconcile(namespace, name),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::DeadlineExceeded),
        }
    }

    async fn reconcile_terminating(
        &self,
        mut descriptor: PipelineDescriptor,
    ) -> Result<ReconcileOutcome, EngineError> {
        if !descriptor.metadata.has_finalizer(DESCRIPTOR_FINALIZER) {
            debug!(name = %descriptor.metadata.name, "terminating without our finalizer");
            return Ok(ReconcileOutcome { requeue: false });
        }

        self.lifecycle.cleanup(&descriptor).await?;
        descriptor.metadata.remove_finalizer(DESCRIPTOR_FINALIZER);
        self.store.update_object(&mut descriptor).await?;
        info!(name = %descriptor.metadata.name, "descriptor finalized");
        Ok(ReconcileOutcome { requeue: false })
    }

    async fn ensure_finalizer(&self, namespace: &str, name: &str) -> Result<(), EngineError> {
        // Re-read: the status commit may have advanced the version token.
        let Some(mut fresh) = self
            .store
            .get_as::<PipelineDescriptor>(Some(namespace), name)
            .await?
        else {
            return Ok(());
        };
        if fresh.metadata.has_finalizer(DESCRIPTOR_FINALIZER) {
            return Ok(());
        }
        fresh.metadata.add_finalizer(DESCRIPTOR_FINALIZER);
        self.store.update_object(&mut fresh).await?;
        debug!(name, "finalizer attached");
        Ok(())
    }
}

pub(crate) fn descriptor_owner(
    descriptor: &PipelineDescriptor,
) -> Result<OwnerReference, EngineError> {
    let uid = descriptor
        .metadata
        .uid
        .as_deref()
        .ok_or_else(|| EngineError::internal("descriptor has no uid"))?;
    Ok(OwnerReference::controller(
        PipelineDescriptor::KIND,
        &descriptor.metadata.name,
        uid,
    ))
}

/// Syncs the manifest repository to the descriptor's release.
pub struct GitRepoReconciler {
    sync: GitRepoSync,
    config: Arc<EngineConfig>,
}

impl GitRepoReconciler {
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            sync: GitRepoSync::new(&config),
            config,
        }
    }
}

#[async_trait]
impl SubReconciler for GitRepoReconciler {
    fn name(&self) -> &'static str {
        "git-repo"
    }

    async fn reconcile(&self, descriptor: &mut PipelineDescriptor) -> Result<bool, EngineError> {
        let worktree = self.config.worktree_path(&descriptor.spec.release);
        self.sync.sync(&worktree, &descriptor.spec.release).await?;
        Ok(false)
    }
}

/// Applies the pipeline, task and shared cluster manifests from the synced
/// working tree.
pub struct ManifestApplyReconciler {
    manifests: ManifestReconciler,
    config: Arc<EngineConfig>,
}

impl ManifestApplyReconciler {
    #[must_use]
    pub fn new(store: DynStore, config: Arc<EngineConfig>) -> Self {
        Self {
            manifests: ManifestReconciler::new(store),
            config,
        }
    }
}

#[async_trait]
impl SubReconciler for ManifestApplyReconciler {
    fn name(&self) -> &'static str {
        "manifests"
    }

    async fn reconcile(&self, descriptor: &mut PipelineDescriptor) -> Result<bool, EngineError> {
        let namespace = descriptor
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| EngineError::internal("descriptor has no namespace"))?;
        let owner = descriptor_owner(descriptor)?;
        let worktree = self.config.worktree_path(&descriptor.spec.release);
        let scope = Scope::Owned {
            owner,
            namespace: namespace.clone(),
        };

        // Toggles are evaluated fresh every pass: apply-if-enabled,
        // delete-if-disabled.
        let toggles = [
            (CI_PIPELINE_FILE, descriptor.spec.apply_ci_pipeline),
            (HOSTED_PIPELINE_FILE, descriptor.spec.apply_hosted_pipeline),
            (RELEASE_PIPELINE_FILE, descriptor.spec.apply_release_pipeline),
        ];
        for (file, enabled) in toggles {
            let path = self.config.pipeline_manifest_path(&worktree, file);
            if enabled {
                self.manifests.apply::<PipelineDefinition>(&path, &scope).await?;
            } else {
                self.manifests
                    .delete::<PipelineDefinition>(&path, Some(&namespace))
                    .await?;
            }
        }

        // Every regular file in the tasks directory, non-recursive.
        let tasks_dir = self.config.tasks_dir(&worktree);
        let mut task_files = Vec::new();
        let mut entries = tokio::fs::read_dir(&tasks_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                task_files.push(entry.path());
            }
        }
        task_files.sort();
        for path in task_files {
            self.manifests.apply::<TaskDefinition>(&path, &scope).await?;
        }

        let shared = Scope::Shared {
            owning_namespace: None,
        };
        self.manifests
            .apply::<ClusterRole>(
                &self.config.cluster_manifest_path(&worktree, CLUSTER_ROLE_FILE),
                &shared,
            )
            .await?;
        self.manifests
            .apply::<SecurityPolicy>(
                &self.config.cluster_manifest_path(&worktree, SECURITY_POLICY_FILE),
                &shared,
            )
            .await?;
        self.manifests
            .apply_rendered_binding(
                &self.config.cluster_manifest_path(&worktree, ROLE_BINDING_FILE),
                &namespace,
            )
            .await?;

        Ok(false)
    }
}
