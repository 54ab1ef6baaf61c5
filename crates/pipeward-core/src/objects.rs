//! The object kinds managed by the reconciliation engine.
//!
//! Every kind stored in the declarative store implements [`StoreObject`],
//! which ties a kind string to a serializable type carrying [`ObjectMeta`].
//! Kinds here mirror the manifests shipped in the manifest repository plus
//! the built-in secret and image-stream kinds the engine monitors.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// Label marking cluster-scoped objects that are shared between namespaces.
pub const LABEL_SHARED_RESOURCE: &str = "pipeward.dev/shared-resource";
/// Label recording which namespace a shared binding serves.
pub const LABEL_OWNING_NAMESPACE: &str = "pipeward.dev/owning-namespace";

/// A typed object the store can persist.
///
/// Implementors pair a stable kind string with their metadata accessors; the
/// store APIs stay object-shaped (`serde_json::Value`) and this trait is the
/// typed seam on top.
pub trait StoreObject: Serialize + DeserializeOwned + Send + Sync {
    /// Stable kind identifier used as part of the storage key.
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_store_object {
    ($ty:ty, $kind:literal) => {
        impl StoreObject for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

/// A pipeline definition applied from the manifest repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl_store_object!(PipelineDefinition, "PipelineDefinition");

/// A task definition applied from the manifest repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl_store_object!(TaskDefinition, "TaskDefinition");

/// Cluster-scoped role granting the pipeline runner its permissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRole {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: serde_json::Value,
}

impl_store_object!(ClusterRole, "ClusterRole");

/// Cluster-scoped binding granting the role to a namespace's runner account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRoleBinding {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: serde_json::Value,
    #[serde(default, rename = "roleRef")]
    pub role_ref: serde_json::Value,
}

impl_store_object!(ClusterRoleBinding, "ClusterRoleBinding");

/// Cluster-scoped security policy for the pipeline runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl_store_object!(SecurityPolicy, "SecurityPolicy");

/// A secret holding opaque key/value data the pipelines depend on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl_store_object!(SecretRecord, "SecretRecord");

/// An image stream tracking tags imported from an external registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStream {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl_store_object!(ImageStream, "ImageStream");

/// A one-shot request asking the store backend to import an image stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStreamImport {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImageImportSpec,
}

impl_store_object!(ImageStreamImport, "ImageStreamImport");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageImportSpec {
    /// When `true` the backend materializes an [`ImageStream`].
    #[serde(default)]
    pub import: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub from: ImageRef,
    #[serde(default)]
    pub import_policy: ImportPolicy,
    #[serde(default)]
    pub reference_policy: ReferencePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportPolicy {
    /// Re-import on a schedule so new upstream tags keep flowing in.
    #[serde(default)]
    pub scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePolicy {
    #[serde(rename = "type")]
    pub policy_type: String,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self {
            policy_type: "Local".to_string(),
        }
    }
}
