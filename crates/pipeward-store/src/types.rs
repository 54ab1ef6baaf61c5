//! Common types used by the store abstraction.

use std::collections::BTreeMap;

use serde_json::Value;

use pipeward_core::StoreObject;

use crate::error::StoreError;

/// An object as returned by the store, with its bookkeeping surfaced.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// The kind under which the object is stored.
    pub kind: String,
    /// The object's name.
    pub name: String,
    /// The object's namespace; `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    /// Store-assigned identity token.
    pub uid: String,
    /// Store-assigned optimistic-concurrency token.
    pub resource_version: String,
    /// The full object payload, metadata included.
    pub object: Value,
}

impl StoredObject {
    /// Decodes the payload into a typed object.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidObject` if the payload does not match the
    /// target type.
    pub fn decode<T: StoreObject>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.object.clone()).map_err(|e| {
            StoreError::invalid_object(format!(
                "failed to decode {}/{} as {}: {e}",
                self.kind,
                self.name,
                T::KIND
            ))
        })
    }
}

/// Equality-based label selector for list operations.
///
/// An empty selector matches every object. A non-empty selector matches
/// objects carrying every listed key with exactly the listed value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Creates a selector matching every object.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Adds an equality requirement, returning the selector for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if the selector has no requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Returns `true` if the given labels satisfy every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}
