//! Object metadata shared by every object kept in the declarative store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Identity and bookkeeping attached to every stored object.
///
/// The store owns `uid`, `resource_version`, `generation` and
/// `deletion_timestamp`; clients never set those themselves. Everything else
/// is authored by whoever creates the object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Absent for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Identity token assigned by the store on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Optimistic-concurrency token; an update carrying a stale value fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Bumped by the store whenever the object's spec changes.
    #[serde(default)]
    pub generation: i64,
    /// Set by the store when a delete is deferred by pending finalizers.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub deletion_timestamp: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Creates metadata for a namespaced object.
    #[must_use]
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Creates metadata for a cluster-scoped object.
    #[must_use]
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if the object carries the given finalizer.
    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Adds the finalizer if it is not already present.
    pub fn add_finalizer(&mut self, finalizer: impl Into<String>) {
        let finalizer = finalizer.into();
        if !self.has_finalizer(&finalizer) {
            self.finalizers.push(finalizer);
        }
    }

    /// Removes the finalizer if present.
    pub fn remove_finalizer(&mut self, finalizer: &str) {
        self.finalizers.retain(|f| f != finalizer);
    }

    /// Returns `true` if the store has marked the object for deletion.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Returns `true` if an owner reference with the given uid exists.
    #[must_use]
    pub fn has_owner(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|o| o.uid == uid)
    }
}

/// A reference to the object that owns this one.
///
/// Owned objects are garbage-collected by the store when their owner is
/// deleted. Owners must live in the same namespace, which is why
/// cluster-scoped objects cannot carry owner references and are tracked
/// through labels instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Creates a controlling owner reference.
    #[must_use]
    pub fn controller(kind: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
            controller: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_handling() {
        let mut meta = ObjectMeta::namespaced("pipeline", "team-a");
        assert!(!meta.has_finalizer("pipeward.dev/finalizer"));

        meta.add_finalizer("pipeward.dev/finalizer");
        meta.add_finalizer("pipeward.dev/finalizer");
        assert_eq!(meta.finalizers.len(), 1);

        meta.remove_finalizer("pipeward.dev/finalizer");
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn test_metadata_serialization_skips_store_fields() {
        let meta = ObjectMeta::namespaced("pipeline", "team-a");
        let json = serde_json::to_value(&meta).expect("serialization failed");

        assert_eq!(json["name"], "pipeline");
        assert_eq!(json["namespace"], "team-a");
        assert!(json.get("uid").is_none());
        assert!(json.get("resourceVersion").is_none());
        assert!(json.get("deletionTimestamp").is_none());
    }

    #[test]
    fn test_owner_reference_lookup() {
        let mut meta = ObjectMeta::namespaced("stream", "team-a");
        meta.owner_references
            .push(OwnerReference::controller("PipelineDescriptor", "pipeline", "uid-1"));

        assert!(meta.has_owner("uid-1"));
        assert!(!meta.has_owner("uid-2"));
    }
}
