//! The pipeline descriptor: the user-authored intent object driving the
//! reconciliation engine.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::meta::ObjectMeta;
use crate::objects::StoreObject;

/// Finalizer attached to descriptors so shared-resource cleanup runs before
/// the store physically removes them.
pub const DESCRIPTOR_FINALIZER: &str = "pipeward.dev/finalizer";

/// The user-facing configuration object.
///
/// The spec is mutated only by the user; the status is owned exclusively by
/// the reconciliation engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineDescriptorSpec,
    #[serde(default)]
    pub status: PipelineDescriptorStatus,
}

/// Desired state: which release of the manifest repository to sync, which
/// pipelines to apply, and optional overrides for the secret names the
/// pipelines depend on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDescriptorSpec {
    /// Git branch/tag suffix pinning the manifest repository version.
    #[serde(default)]
    pub release: String,

    #[serde(default)]
    pub apply_ci_pipeline: bool,
    #[serde(default)]
    pub apply_hosted_pipeline: bool,
    #[serde(default)]
    pub apply_release_pipeline: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_token_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_api_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ssh_secret_name: Option<String>,
}

impl PipelineDescriptorSpec {
    /// Resolves an effective secret name: the spec override when set,
    /// otherwise the supplied default.
    #[must_use]
    pub fn secret_name<'a>(override_name: &'a Option<String>, default: &'a str) -> &'a str {
        match override_name {
            Some(name) if !name.is_empty() => name,
            _ => default,
        }
    }
}

/// Observed state, written only through the status subresource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDescriptorStatus {
    /// The last spec generation the engine successfully processed.
    #[serde(default)]
    pub observed_generation: i64,
    /// Content hash of the synced manifest repository checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_hash: Option<String>,
    /// One health condition per monitored dependency.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PipelineDescriptor {
    /// Looks up a condition by type.
    #[must_use]
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

impl StoreObject for PipelineDescriptor {
    const KIND: &'static str = "PipelineDescriptor";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
