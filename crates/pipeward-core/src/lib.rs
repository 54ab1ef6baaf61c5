pub mod condition;
pub mod descriptor;
pub mod meta;
pub mod objects;

pub use condition::{
    Condition, ConditionStatus, REASON_AS_EXPECTED, REASON_INVALID, REASON_KEY_DATA_INVALID,
    REASON_KEY_NOT_FOUND, REASON_NOT_FOUND, set_condition,
};
pub use descriptor::{
    DESCRIPTOR_FINALIZER, PipelineDescriptor, PipelineDescriptorSpec, PipelineDescriptorStatus,
};
pub use meta::{ObjectMeta, OwnerReference};
pub use objects::{
    ClusterRole, ClusterRoleBinding, ImageImportSpec, ImageRef, ImageSpec, ImageStream,
    ImageStreamImport, ImportPolicy, LABEL_OWNING_NAMESPACE, LABEL_SHARED_RESOURCE,
    PipelineDefinition, ReferencePolicy, SecretRecord, SecurityPolicy, StoreObject, TaskDefinition,
};
