//! Reference-counted cleanup of shared cluster resources.
//!
//! Cluster-scoped objects cannot carry owner references (owners must live in
//! the same namespace), so cascade garbage collection is unavailable for
//! them. Instead, on descriptor deletion we count sibling descriptors and
//! delete the labeled shared objects when this descriptor is the last user.
//! The count and the delete are not atomic; deletes are delete-if-exists so
//! concurrent teardown at worst leaks, never fails.

use tracing::{debug, info};

use pipeward_core::{
    ClusterRole, ClusterRoleBinding, LABEL_OWNING_NAMESPACE, LABEL_SHARED_RESOURCE,
    PipelineDescriptor, SecurityPolicy, StoreObject,
};
use pipeward_store::{DynStore, LabelSelector, Store};

use crate::error::EngineError;

/// Deletion-time lifecycle of shared cluster resources.
#[derive(Clone)]
pub struct SharedResourceLifecycle {
    store: DynStore,
}

impl SharedResourceLifecycle {
    #[must_use]
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Runs the reference-counted cleanup for a terminating descriptor.
    ///
    /// Namespace check first: if this is the only descriptor in its
    /// namespace, the per-namespace role binding goes. Cluster check second:
    /// if this is the only descriptor anywhere, the cluster role and the
    /// security policy go too.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the caller must not remove the finalizer
    /// until this returns `Ok`.
    pub async fn cleanup(&self, descriptor: &PipelineDescriptor) -> Result<(), EngineError> {
        let namespace = descriptor
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| EngineError::internal("descriptor has no namespace"))?;

        let in_namespace = self
            .store
            .list(
                PipelineDescriptor::KIND,
                Some(namespace),
                &LabelSelector::any(),
            )
            .await?;
        if in_namespace.len() == 1 {
            info!(namespace, "last descriptor in namespace, removing shared binding");
            let selector = LabelSelector::any()
                .with(LABEL_SHARED_RESOURCE, "true")
                .with(LABEL_OWNING_NAMESPACE, namespace);
            self.delete_labeled::<ClusterRoleBinding>(&selector).await?;
        } else {
            debug!(
                namespace,
                count = in_namespace.len(),
                "siblings remain, keeping shared binding"
            );
        }

        let everywhere = self
            .store
            .list(PipelineDescriptor::KIND, None, &LabelSelector::any())
            .await?;
        if everywhere.len() == 1 {
            info!("last descriptor in the store, removing cluster-wide shared resources");
            let selector = LabelSelector::any().with(LABEL_SHARED_RESOURCE, "true");
            self.delete_labeled::<ClusterRole>(&selector).await?;
            self.delete_labeled::<SecurityPolicy>(&selector).await?;
        } else {
            debug!(
                count = everywhere.len(),
                "descriptors remain elsewhere, keeping cluster-wide shared resources"
            );
        }
        Ok(())
    }

    async fn delete_labeled<T: StoreObject>(
        &self,
        selector: &LabelSelector,
    ) -> Result<(), EngineError> {
        let matches = self.store.list(T::KIND, None, selector).await?;
        for object in matches {
            match self
                .store
                .delete(T::KIND, object.namespace.as_deref(), &object.name)
                .await
            {
                Ok(()) => debug!(kind = T::KIND, name = %object.name, "shared resource deleted"),
                // A concurrent teardown got there first.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
