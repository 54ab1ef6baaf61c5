//! Per-dependency reconcilers: secret checks and index image streams.
//!
//! Secrets are never created here. They are operator-supplied, and the engine
//! only verifies presence and shape. Image streams for the two fixed external
//! indices are created from catalog versions when absent.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use pipeward_core::{
    ImageImportSpec, ImageRef, ImageSpec, ImageStream, ImageStreamImport, ImportPolicy, ObjectMeta,
    OwnerReference, PipelineDescriptor, PipelineDescriptorSpec, ReferencePolicy, SecretRecord,
    StoreObject,
};
use pipeward_store::{DynStore, StoreExt};

use crate::catalog::{DynCatalogClient, active_versions};
use crate::config::{EngineConfig, IndexIdentity, SecretsConfig};
use crate::error::EngineError;
use crate::orchestrator::SubReconciler;

/// Outcome of a single secret check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretCheck {
    Healthy,
    /// The secret object does not exist.
    Missing,
    /// The secret exists but lacks the expected key.
    KeyNotFound { key: String },
    /// The expected key is present but holds empty data.
    KeyDataInvalid { key: String },
}

impl SecretCheck {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Verifies that a secret exists and holds non-empty data at the given key.
///
/// # Errors
///
/// Propagates store failures; a missing secret is a check outcome, not an
/// error.
pub async fn check_secret(
    store: &DynStore,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<SecretCheck, EngineError> {
    let Some(secret) = store.get_as::<SecretRecord>(Some(namespace), name).await? else {
        return Ok(SecretCheck::Missing);
    };
    match secret.data.get(key) {
        None => Ok(SecretCheck::KeyNotFound {
            key: key.to_string(),
        }),
        Some(value) if value.is_empty() => Ok(SecretCheck::KeyDataInvalid {
            key: key.to_string(),
        }),
        Some(_) => Ok(SecretCheck::Healthy),
    }
}

/// One secret the pipelines depend on, resolved against the descriptor.
#[derive(Debug, Clone)]
pub struct SecretRequirement {
    /// Condition type reported for this secret.
    pub condition_type: &'static str,
    /// Effective secret name (spec override or configured default).
    pub name: String,
    /// Key expected inside the secret.
    pub key: String,
    /// Optional secrets (registry, SSH) are checked only when the
    /// descriptor names them.
    pub requested: bool,
}

/// Resolves the full requirement list for a descriptor.
#[must_use]
pub fn secret_requirements(
    spec: &PipelineDescriptorSpec,
    secrets: &SecretsConfig,
) -> Vec<SecretRequirement> {
    let required = |condition_type, override_name: &Option<String>, default: &str, key: &str| {
        SecretRequirement {
            condition_type,
            name: PipelineDescriptorSpec::secret_name(override_name, default).to_string(),
            key: key.to_string(),
            requested: true,
        }
    };
    let optional = |condition_type, override_name: &Option<String>, key: &str| {
        let name = override_name.clone().unwrap_or_default();
        SecretRequirement {
            condition_type,
            requested: !name.is_empty(),
            name,
            key: key.to_string(),
        }
    };

    vec![
        required(
            "KubeconfigSecretReady",
            &spec.kubeconfig_secret_name,
            &secrets.kubeconfig_name,
            &secrets.kubeconfig_key,
        ),
        required(
            "GitTokenSecretReady",
            &spec.git_token_secret_name,
            &secrets.git_token_name,
            &secrets.git_token_key,
        ),
        optional("GitSshSecretReady", &spec.git_ssh_secret_name, &secrets.ssh_key),
        required(
            "CatalogApiSecretReady",
            &spec.catalog_api_secret_name,
            &secrets.catalog_api_name,
            &secrets.catalog_api_key,
        ),
        optional(
            "RegistrySecretReady",
            &spec.registry_secret_name,
            &secrets.registry_key,
        ),
    ]
}

/// Fails the pass at the first unusable secret dependency.
pub struct SecretsReconciler {
    store: DynStore,
    config: Arc<EngineConfig>,
}

impl SecretsReconciler {
    #[must_use]
    pub fn new(store: DynStore, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl SubReconciler for SecretsReconciler {
    fn name(&self) -> &'static str {
        "secrets"
    }

    async fn reconcile(&self, descriptor: &mut PipelineDescriptor) -> Result<bool, EngineError> {
        let namespace = descriptor
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| EngineError::internal("descriptor has no namespace"))?;

        for requirement in secret_requirements(&descriptor.spec, &self.config.secrets) {
            if !requirement.requested {
                continue;
            }
            match check_secret(&self.store, namespace, &requirement.name, &requirement.key).await? {
                SecretCheck::Healthy => {}
                SecretCheck::Missing => {
                    return Err(EngineError::missing_dependency(
                        SecretRecord::KIND,
                        requirement.name,
                    ));
                }
                SecretCheck::KeyNotFound { key } => {
                    return Err(EngineError::invalid_secret(
                        requirement.name,
                        format!("key '{key}' not found"),
                    ));
                }
                SecretCheck::KeyDataInvalid { key } => {
                    return Err(EngineError::invalid_secret(
                        requirement.name,
                        format!("key '{key}' holds empty data"),
                    ));
                }
            }
        }
        Ok(false)
    }
}

/// Ensures the image stream for one fixed external index exists.
pub struct ImageStreamReconciler {
    store: DynStore,
    catalog: DynCatalogClient,
    identity: IndexIdentity,
    label: &'static str,
}

impl ImageStreamReconciler {
    #[must_use]
    pub fn certified(store: DynStore, catalog: DynCatalogClient, config: &EngineConfig) -> Self {
        Self {
            store,
            catalog,
            identity: config.indices.certified.clone(),
            label: "certified-index",
        }
    }

    #[must_use]
    pub fn marketplace(store: DynStore, catalog: DynCatalogClient, config: &EngineConfig) -> Self {
        Self {
            store,
            catalog,
            identity: config.indices.marketplace.clone(),
            label: "marketplace-index",
        }
    }

    fn owner_reference(descriptor: &PipelineDescriptor) -> Result<OwnerReference, EngineError> {
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
}

#[async_trait]
impl SubReconciler for ImageStreamReconciler {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn reconcile(&self, descriptor: &mut PipelineDescriptor) -> Result<bool, EngineError> {
        let namespace = descriptor
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| EngineError::internal("descriptor has no namespace"))?;
        let owner = Self::owner_reference(descriptor)?;

        if let Some(mut stream) = self
            .store
            .get_as::<ImageStream>(Some(&namespace), &self.identity.stream_name)
            .await?
        {
            // Best-effort owner re-assertion: failure self-heals next pass.
            if !stream.metadata.has_owner(&owner.uid) {
                stream.metadata.owner_references.push(owner);
                if let Err(e) = self.store.update_object(&mut stream).await {
                    warn!(
                        stream = %self.identity.stream_name,
                        error = %e,
                        "failed to re-assert owner reference on image stream"
                    );
                }
            }
            return Ok(false);
        }

        let versions =
            active_versions(self.catalog.index_versions(&self.identity.organization).await?);
        let mut metadata = ObjectMeta::namespaced(&self.identity.stream_name, &namespace);
        metadata.owner_references.push(owner);
        let mut import = ImageStreamImport {
            metadata,
            spec: ImageImportSpec {
                import: true,
                images: versions
                    .iter()
                    .map(|v| ImageSpec {
                        from: ImageRef {
                            kind: "DockerImage".to_string(),
                            name: format!("{}:v{}", self.identity.image_repo, v.version),
                        },
                        import_policy: ImportPolicy { scheduled: true },
                        reference_policy: ReferencePolicy::default(),
                    })
                    .collect(),
            },
        };

        match self.store.create_object(&mut import).await {
            Ok(()) => {
                debug!(
                    stream = %self.identity.stream_name,
                    versions = versions.len(),
                    "image stream import created"
                );
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }
        // Requeue to observe the materialized stream.
        Ok(true)
    }
}
