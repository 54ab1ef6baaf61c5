//! In-memory store backend.
//!
//! Backs the engine in tests and single-process deployments. The map is
//! guarded by a single `RwLock`; resource versions come from a process-wide
//! monotonic counter so version conflicts are detectable across kinds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use pipeward_core::ObjectMeta;

use crate::error::StoreError;
use crate::traits::Store;
use crate::types::{LabelSelector, StoredObject};

type Key = (String, Option<String>, String);

/// A thread-safe in-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Key, Value>>,
    next_version: AtomicU64,
    mutations: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of state-changing writes performed so far.
    ///
    /// Lets tests assert that a repeated reconcile pass performs no writes.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    fn bump_version(&self) -> String {
        let v = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        v.to_string()
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

fn parse_meta(object: &Value) -> Result<ObjectMeta, StoreError> {
    let meta = object
        .get("metadata")
        .ok_or_else(|| StoreError::invalid_object("object has no metadata"))?;
    serde_json::from_value(meta.clone())
        .map_err(|e| StoreError::invalid_object(format!("malformed metadata: {e}")))
}

fn write_meta(object: &mut Value, meta: &ObjectMeta) -> Result<(), StoreError> {
    let map = object
        .as_object_mut()
        .ok_or_else(|| StoreError::invalid_object("object payload is not a JSON object"))?;
    let encoded = serde_json::to_value(meta)
        .map_err(|e| StoreError::internal(format!("failed to encode metadata: {e}")))?;
    map.insert("metadata".to_string(), encoded);
    Ok(())
}

fn key_of(kind: &str, meta: &ObjectMeta) -> Key {
    (kind.to_string(), meta.namespace.clone(), meta.name.clone())
}

fn stored_from(kind: &str, meta: &ObjectMeta, object: Value) -> StoredObject {
    StoredObject {
        kind: kind.to_string(),
        name: meta.name.clone(),
        namespace: meta.namespace.clone(),
        uid: meta.uid.clone().unwrap_or_default(),
        resource_version: meta.resource_version.clone().unwrap_or_default(),
        object,
    }
}

fn check_version(incoming: &ObjectMeta, existing: &ObjectMeta) -> Result<(), StoreError> {
    if let (Some(carried), Some(current)) =
        (&incoming.resource_version, &existing.resource_version)
        && carried != current
    {
        return Err(StoreError::version_conflict(
            current.clone(),
            carried.clone(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<StoredObject>, StoreError> {
        let key = (
            kind.to_string(),
            namespace.map(ToOwned::to_owned),
            name.to_string(),
        );
        let objects = self.objects.read().await;
        match objects.get(&key) {
            Some(object) => {
                let meta = parse_meta(object)?;
                Ok(Some(stored_from(kind, &meta, object.clone())))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<StoredObject>, StoreError> {
        let objects = self.objects.read().await;
        let mut result = Vec::new();
        for ((k, ns, _), object) in objects.iter() {
            if k != kind {
                continue;
            }
            // None means an unscoped listing across the whole store.
            if namespace.is_some() && ns.as_deref() != namespace {
                continue;
            }
            let meta = parse_meta(object)?;
            if selector.matches(&meta.labels) {
                result.push(stored_from(kind, &meta, object.clone()));
            }
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn create(&self, kind: &str, object: &Value) -> Result<StoredObject, StoreError> {
        let mut meta = parse_meta(object)?;
        if meta.name.is_empty() {
            return Err(StoreError::invalid_object("object has no name"));
        }
        let key = key_of(kind, &meta);

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::already_exists(kind, &meta.name));
        }

        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(self.bump_version());
        meta.generation = 1;
        meta.deletion_timestamp = None;

        let mut value = object.clone();
        write_meta(&mut value, &meta)?;
        objects.insert(key, value.clone());
        self.record_mutation();
        debug!(kind, name = %meta.name, "created object");
        Ok(stored_from(kind, &meta, value))
    }

    async fn update(&self, kind: &str, object: &Value) -> Result<StoredObject, StoreError> {
        let mut meta = parse_meta(object)?;
        let key = key_of(kind, &meta);

        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(kind, &meta.name))?;
        let existing_meta = parse_meta(existing)?;
        check_version(&meta, &existing_meta)?;

        // Store-owned fields always come from the stored copy.
        meta.uid = existing_meta.uid.clone();
        meta.deletion_timestamp = existing_meta.deletion_timestamp;
        meta.generation = existing_meta.generation;
        if object.get("spec") != existing.get("spec") {
            meta.generation += 1;
        }
        meta.resource_version = Some(self.bump_version());

        // Removing the last finalizer from a terminating object completes
        // the deletion.
        if meta.is_terminating() && meta.finalizers.is_empty() {
            let mut value = object.clone();
            write_meta(&mut value, &meta)?;
            objects.remove(&key);
            self.record_mutation();
            debug!(kind, name = %meta.name, "finalized object removed");
            return Ok(stored_from(kind, &meta, value));
        }

        let mut value = object.clone();
        // Status is written only through update_status.
        if let (Some(map), Some(status)) = (value.as_object_mut(), existing.get("status")) {
            map.insert("status".to_string(), status.clone());
        }
        write_meta(&mut value, &meta)?;
        objects.insert(key, value.clone());
        self.record_mutation();
        debug!(kind, name = %meta.name, "updated object");
        Ok(stored_from(kind, &meta, value))
    }

    async fn update_status(&self, kind: &str, object: &Value) -> Result<StoredObject, StoreError> {
        let meta = parse_meta(object)?;
        let key = key_of(kind, &meta);

        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(kind, &meta.name))?;
        let mut existing_meta = parse_meta(existing)?;
        check_version(&meta, &existing_meta)?;

        let status = object.get("status").cloned().unwrap_or(Value::Null);
        existing_meta.resource_version = Some(self.bump_version());

        let mut value = existing.clone();
        if let Some(map) = value.as_object_mut() {
            map.insert("status".to_string(), status);
        }
        write_meta(&mut value, &existing_meta)?;
        objects.insert(key, value.clone());
        self.record_mutation();
        debug!(kind, name = %existing_meta.name, "updated object status");
        Ok(stored_from(kind, &existing_meta, value))
    }

    async fn delete(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = (
            kind.to_string(),
            namespace.map(ToOwned::to_owned),
            name.to_string(),
        );
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(kind, name))?;
        let mut meta = parse_meta(existing)?;

        if meta.finalizers.is_empty() {
            objects.remove(&key);
            self.record_mutation();
            debug!(kind, name, "deleted object");
            return Ok(());
        }

        // Deletion is deferred until the finalizers are cleared.
        if !meta.is_terminating() {
            meta.deletion_timestamp = Some(OffsetDateTime::now_utc());
            meta.resource_version = Some(self.bump_version());
            let mut value = existing.clone();
            write_meta(&mut value, &meta)?;
            objects.insert(key, value);
            self.record_mutation();
            debug!(kind, name, "marked object for deletion");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use pipeward_core::{ObjectMeta, PipelineDescriptor, SecretRecord, StoreObject};
    use pretty_assertions::assert_eq;

    fn secret(name: &str, namespace: &str) -> SecretRecord {
        SecretRecord {
            metadata: ObjectMeta::namespaced(name, namespace),
            data: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_store_owned_metadata() {
        let store = MemoryStore::new();
        let mut obj = secret("kubeconfig", "team-a");
        store.create_object(&mut obj).await.expect("create");

        assert!(obj.metadata.uid.is_some());
        assert_eq!(obj.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(obj.metadata.generation, 1);

        let fetched: Option<SecretRecord> = store
            .get_as(Some("team-a"), "kubeconfig")
            .await
            .expect("get");
        assert_eq!(fetched, Some(obj));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = MemoryStore::new();
        let mut obj = secret("kubeconfig", "team-a");
        store.create_object(&mut obj).await.expect("create");

        let mut dup = secret("kubeconfig", "team-a");
        let err = store.create_object(&mut dup).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_update_detects_stale_resource_version() {
        let store = MemoryStore::new();
        let mut obj = secret("kubeconfig", "team-a");
        store.create_object(&mut obj).await.expect("create");

        let mut first = obj.clone();
        let mut second = obj.clone();

        first.data.insert("a".to_string(), "1".to_string());
        store.update_object(&mut first).await.expect("update");

        second.data.insert("b".to_string(), "2".to_string());
        let err = store.update_object(&mut second).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_generation_bumps_only_on_spec_change() {
        let store = MemoryStore::new();
        let mut descriptor = PipelineDescriptor {
            metadata: ObjectMeta::namespaced("pipeline", "team-a"),
            ..Default::default()
        };
        store.create_object(&mut descriptor).await.expect("create");
        assert_eq!(descriptor.metadata.generation, 1);

        // Metadata-only change: no bump.
        descriptor.metadata.add_finalizer("pipeward.dev/finalizer");
        store.update_object(&mut descriptor).await.expect("update");
        assert_eq!(descriptor.metadata.generation, 1);

        // Spec change: bump.
        descriptor.spec.release = "v1.1.0".to_string();
        store.update_object(&mut descriptor).await.expect("update");
        assert_eq!(descriptor.metadata.generation, 2);
    }

    #[tokio::test]
    async fn test_status_writes_do_not_bump_generation() {
        let store = MemoryStore::new();
        let mut descriptor = PipelineDescriptor {
            metadata: ObjectMeta::namespaced("pipeline", "team-a"),
            ..Default::default()
        };
        store.create_object(&mut descriptor).await.expect("create");

        descriptor.status.observed_generation = 1;
        descriptor.status.repo_hash = Some("abc".to_string());
        store
            .update_object_status(&mut descriptor)
            .await
            .expect("update status");

        assert_eq!(descriptor.metadata.generation, 1);
        assert_eq!(descriptor.status.repo_hash.as_deref(), Some("abc"));

        let fetched: PipelineDescriptor = store
            .get_as(Some("team-a"), "pipeline")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(fetched.status.repo_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_regular_update_does_not_clobber_status() {
        let store = MemoryStore::new();
        let mut descriptor = PipelineDescriptor {
            metadata: ObjectMeta::namespaced("pipeline", "team-a"),
            ..Default::default()
        };
        store.create_object(&mut descriptor).await.expect("create");

        descriptor.status.repo_hash = Some("abc".to_string());
        store
            .update_object_status(&mut descriptor)
            .await
            .expect("update status");

        let mut stale_status = descriptor.clone();
        stale_status.status = Default::default();
        stale_status.metadata.add_finalizer("pipeward.dev/finalizer");
        store
            .update_object(&mut stale_status)
            .await
            .expect("update");

        assert_eq!(stale_status.status.repo_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_defers_removal() {
        let store = MemoryStore::new();
        let mut descriptor = PipelineDescriptor {
            metadata: ObjectMeta::namespaced("pipeline", "team-a"),
            ..Default::default()
        };
        descriptor.metadata.add_finalizer("pipeward.dev/finalizer");
        store.create_object(&mut descriptor).await.expect("create");

        store
            .delete(PipelineDescriptor::KIND, Some("team-a"), "pipeline")
            .await
            .expect("delete");

        let mut fetched: PipelineDescriptor = store
            .get_as(Some("team-a"), "pipeline")
            .await
            .expect("get")
            .expect("still present");
        assert!(fetched.metadata.is_terminating());

        fetched.metadata.remove_finalizer("pipeward.dev/finalizer");
        store.update_object(&mut fetched).await.expect("update");

        let gone: Option<PipelineDescriptor> = store
            .get_as(Some("team-a"), "pipeline")
            .await
            .expect("get");
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_delete_without_finalizer_removes_immediately() {
        let store = MemoryStore::new();
        let mut obj = secret("kubeconfig", "team-a");
        store.create_object(&mut obj).await.expect("create");

        store
            .delete(SecretRecord::KIND, Some("team-a"), "kubeconfig")
            .await
            .expect("delete");

        let gone: Option<SecretRecord> = store
            .get_as(Some("team-a"), "kubeconfig")
            .await
            .expect("get");
        assert!(gone.is_none());

        let err = store
            .delete(SecretRecord::KIND, Some("team-a"), "kubeconfig")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        for (name, ns, shared) in [
            ("binding-a", None::<&str>, true),
            ("binding-b", None, false),
            ("scoped", Some("team-a"), true),
        ] {
            let mut meta = match ns {
                Some(ns) => ObjectMeta::namespaced(name, ns),
                None => ObjectMeta::cluster_scoped(name),
            };
            if shared {
                meta.labels
                    .insert("pipeward.dev/shared-resource".to_string(), "true".to_string());
            }
            let value = serde_json::json!({"metadata": serde_json::to_value(&meta).unwrap()});
            store.create("ClusterRoleBinding", &value).await.expect("create");
        }

        let selector = LabelSelector::any().with("pipeward.dev/shared-resource", "true");
        let shared = store
            .list("ClusterRoleBinding", None, &selector)
            .await
            .expect("list");
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].name, "binding-a");
        assert_eq!(shared[1].name, "scoped");

        let in_namespace = store
            .list("ClusterRoleBinding", Some("team-a"), &LabelSelector::any())
            .await
            .expect("list");
        assert_eq!(in_namespace.len(), 1);

        let everything = store
            .list("ClusterRoleBinding", None, &LabelSelector::any())
            .await
            .expect("list");
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn test_mutation_counter_tracks_writes() {
        let store = MemoryStore::new();
        assert_eq!(store.mutation_count(), 0);

        let mut obj = secret("kubeconfig", "team-a");
        store.create_object(&mut obj).await.expect("create");
        assert_eq!(store.mutation_count(), 1);

        let _ = store
            .get_as::<SecretRecord>(Some("team-a"), "kubeconfig")
            .await
            .expect("get");
        assert_eq!(store.mutation_count(), 1);

        obj.data.insert("a".to_string(), "1".to_string());
        store.update_object(&mut obj).await.expect("update");
        assert_eq!(store.mutation_count(), 2);
    }
}
