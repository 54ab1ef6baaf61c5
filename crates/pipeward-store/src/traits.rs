//! The store trait every backend implements.
//!
//! The trait itself stays object-shaped (`serde_json::Value`) so it remains
//! object-safe; [`StoreExt`] layers typed helpers on top for callers that
//! work with concrete kinds.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use pipeward_core::StoreObject;

use crate::error::StoreError;
use crate::types::{LabelSelector, StoredObject};

/// Shared handle to a store backend.
pub type DynStore = Arc<dyn Store>;

/// The declarative object store the reconciliation engine runs against.
///
/// Implementations must be thread-safe (`Send + Sync`) and must honor the
/// store-owned metadata contract: `uid`, `resource_version`, `generation`
/// and `deletion_timestamp` are assigned by the store, never by callers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads an object by kind, namespace and name.
    ///
    /// Returns `None` if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing
    /// objects.
    async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<StoredObject>, StoreError>;

    /// Lists objects of a kind matching the label selector.
    ///
    /// With `Some(ns)` the listing covers that namespace only; with
    /// `namespace: None` it covers the whole store, cluster-scoped objects
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues.
    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<StoredObject>, StoreError>;

    /// Creates a new object.
    ///
    /// The store assigns `uid`, `resource_version` and `generation`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if an object with the same kind,
    /// namespace and name exists.
    /// Returns `StoreError::InvalidObject` if the payload is malformed.
    async fn create(&self, kind: &str, object: &Value) -> Result<StoredObject, StoreError>;

    /// Replaces an existing object, leaving its status untouched.
    ///
    /// If the payload carries a `resource_version` the update succeeds only
    /// when it matches the stored one. An update that removes the last
    /// finalizer from a terminating object completes the deletion.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    /// Returns `StoreError::VersionConflict` on a stale `resource_version`.
    async fn update(&self, kind: &str, object: &Value) -> Result<StoredObject, StoreError>;

    /// Replaces only the status of an existing object.
    ///
    /// Spec and metadata are taken from the stored object; `generation` is
    /// never bumped by a status write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    /// Returns `StoreError::VersionConflict` on a stale `resource_version`.
    async fn update_status(&self, kind: &str, object: &Value) -> Result<StoredObject, StoreError>;

    /// Deletes an object by kind, namespace and name.
    ///
    /// If the object carries finalizers the delete is deferred: the store
    /// sets `deletion_timestamp` and keeps the object until the last
    /// finalizer is removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    async fn delete(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Returns the name of this store backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Typed convenience layer over [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    /// Reads and decodes an object of a concrete kind.
    async fn get_as<T: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(T::KIND, namespace, name).await? {
            Some(stored) => Ok(Some(stored.decode()?)),
            None => Ok(None),
        }
    }

    /// Lists and decodes objects of a concrete kind.
    async fn list_as<T: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<T>, StoreError> {
        let stored = self.list(T::KIND, namespace, selector).await?;
        stored.iter().map(StoredObject::decode).collect()
    }

    /// Creates a typed object, writing the store-assigned metadata back.
    async fn create_object<T: StoreObject>(&self, object: &mut T) -> Result<(), StoreError> {
        let value = encode(object)?;
        let stored = self.create(T::KIND, &value).await?;
        *object = stored.decode()?;
        Ok(())
    }

    /// Updates a typed object, writing the store-assigned metadata back.
    async fn update_object<T: StoreObject>(&self, object: &mut T) -> Result<(), StoreError> {
        let value = encode(object)?;
        let stored = self.update(T::KIND, &value).await?;
        *object = stored.decode()?;
        Ok(())
    }

    /// Updates a typed object's status, writing the result back.
    async fn update_object_status<T: StoreObject>(&self, object: &mut T) -> Result<(), StoreError> {
        let value = encode(object)?;
        let stored = self.update_status(T::KIND, &value).await?;
        *object = stored.decode()?;
        Ok(())
    }

    /// Deletes a typed object by namespace and name.
    async fn delete_object<T: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.delete(T::KIND, namespace, name).await
    }
}

#[async_trait]
impl<S: Store + ?Sized> StoreExt for S {}

fn encode<T: StoreObject>(object: &T) -> Result<Value, StoreError> {
    serde_json::to_value(object)
        .map_err(|e| StoreError::invalid_object(format!("failed to encode {}: {e}", T::KIND)))
}
