//! Create-or-update of manifest-backed objects.
//!
//! One algorithm serves every kind: read the YAML file, deserialize into the
//! target kind, scope it, then create or fully replace it in the store. The
//! kind-specific part lives entirely in the `StoreObject` implementations.

use std::path::Path;

use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

use pipeward_core::{
    ClusterRoleBinding, LABEL_OWNING_NAMESPACE, LABEL_SHARED_RESOURCE, OwnerReference, StoreObject,
};
use pipeward_store::{DynStore, Store, StoreExt};

use crate::error::EngineError;

/// How an applied object is tied to the descriptor that caused it.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Namespaced object owned by the descriptor; cascade-deleted with it.
    Owned {
        owner: OwnerReference,
        namespace: String,
    },
    /// Cluster-scoped object shared across descriptors; labeled for
    /// reference-counted cleanup instead of ownership.
    Shared {
        /// Set for per-namespace shared objects (the role binding).
        owning_namespace: Option<String>,
    },
}

/// Applies and deletes manifest files against the store.
#[derive(Clone)]
pub struct ManifestReconciler {
    store: DynStore,
}

impl ManifestReconciler {
    #[must_use]
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Creates or fully replaces the object described by the manifest file.
    ///
    /// When the stored object already matches the manifest no update is
    /// issued, so a repeated pass performs no writes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidManifest` for unparseable files and
    /// propagates store failures other than "already exists" on create.
    pub async fn apply<T: StoreObject>(&self, path: &Path, scope: &Scope) -> Result<(), EngineError> {
        let mut desired: T = read_manifest(path).await?;

        match scope {
            Scope::Owned { namespace, .. } => {
                desired.metadata_mut().namespace = Some(namespace.clone());
            }
            Scope::Shared { owning_namespace } => {
                desired
                    .metadata_mut()
                    .labels
                    .insert(LABEL_SHARED_RESOURCE.to_string(), "true".to_string());
                if let Some(ns) = owning_namespace {
                    desired
                        .metadata_mut()
                        .labels
                        .insert(LABEL_OWNING_NAMESPACE.to_string(), ns.clone());
                }
            }
        }

        let name = desired.metadata().name.clone();
        let namespace = desired.metadata().namespace.clone();

        match self.store.get(T::KIND, namespace.as_deref(), &name).await? {
            Some(existing) => {
                // Full replace of the spec, but the stored identity and
                // bookkeeping carry over wholesale.
                let stored: T = existing.decode()?;
                *desired.metadata_mut() = stored.metadata().clone();
                let desired_value = encode(&desired)?;
                if desired_value == existing.object {
                    debug!(kind = T::KIND, name = %name, "manifest unchanged, skipping update");
                    return Ok(());
                }
                self.store.update(T::KIND, &desired_value).await?;
                debug!(kind = T::KIND, name = %name, "manifest updated");
            }
            None => {
                if let Scope::Owned { owner, .. } = scope {
                    desired.metadata_mut().owner_references.push(owner.clone());
                }
                let value = encode(&desired)?;
                match self.store.create(T::KIND, &value).await {
                    Ok(_) => debug!(kind = T::KIND, name = %name, "manifest created"),
                    // Lost a create race with a sibling reconcile.
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Deletes the object described by the manifest file.
    ///
    /// A missing object is success: delete is an idempotent no-op.
    pub async fn delete<T: StoreObject>(
        &self,
        path: &Path,
        namespace: Option<&str>,
    ) -> Result<(), EngineError> {
        let desired: T = read_manifest(path).await?;
        let name = desired.metadata().name.clone();

        if self.store.get(T::KIND, namespace, &name).await?.is_none() {
            return Ok(());
        }
        match self.store.delete(T::KIND, namespace, &name).await {
            Ok(()) => {
                debug!(kind = T::KIND, name = %name, "manifest deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Renders the shared role-binding template for one owning namespace and
    /// applies the result.
    ///
    /// The binding name is derived from the template name plus the namespace,
    /// and the first subject is repointed at that namespace. The rendered
    /// manifest goes through a temp file that is removed on every exit path.
    pub async fn apply_rendered_binding(
        &self,
        template: &Path,
        owning_namespace: &str,
    ) -> Result<(), EngineError> {
        let contents = fs::read_to_string(template).await?;
        let mut binding: ClusterRoleBinding = serde_yaml::from_str(&contents)
            .map_err(|e| EngineError::invalid_manifest(template.display().to_string(), e.to_string()))?;

        binding.metadata.name = format!("{}-{}", binding.metadata.name, owning_namespace);
        if let Some(subject) = binding
            .subjects
            .as_array_mut()
            .and_then(|subjects| subjects.first_mut())
            .and_then(|subject| subject.as_object_mut())
        {
            subject.insert(
                "namespace".to_string(),
                serde_json::Value::String(owning_namespace.to_string()),
            );
        }

        let mut rendered = NamedTempFile::new()?;
        serde_yaml::to_writer(&mut rendered, &binding)
            .map_err(|e| EngineError::internal(format!("failed to render role binding: {e}")))?;

        self.apply::<ClusterRoleBinding>(
            rendered.path(),
            &Scope::Shared {
                owning_namespace: Some(owning_namespace.to_string()),
            },
        )
        .await
    }
}

async fn read_manifest<T: StoreObject>(path: &Path) -> Result<T, EngineError> {
    let contents = fs::read_to_string(path).await?;
    serde_yaml::from_str(&contents)
        .map_err(|e| EngineError::invalid_manifest(path.display().to_string(), e.to_string()))
}

fn encode<T: StoreObject>(object: &T) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(object)
        .map_err(|e| EngineError::internal(format!("failed to encode {}: {e}", T::KIND)))
}
