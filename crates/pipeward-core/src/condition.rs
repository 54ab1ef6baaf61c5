//! Status conditions reported on the pipeline descriptor.
//!
//! Each monitored dependency gets exactly one named condition. Conditions are
//! recomputed every reconcile pass and follow a uniform three-state pattern:
//! `Unknown` (not yet evaluated this pass), `True` with reason `AsExpected`,
//! or `False` with a specific failure reason.

use serde::{Deserialize, Serialize};

/// Reason code for a healthy dependency.
pub const REASON_AS_EXPECTED: &str = "AsExpected";
/// Reason code for a dependency that could not be found.
pub const REASON_NOT_FOUND: &str = "NotFound";
/// Reason code for a dependency that exists but is malformed.
pub const REASON_INVALID: &str = "Invalid";
/// Reason code for a secret missing the expected key.
pub const REASON_KEY_NOT_FOUND: &str = "KeyNotFound";
/// Reason code for a secret key holding empty data.
pub const REASON_KEY_DATA_INVALID: &str = "KeyDataInvalid";

/// The three-valued state of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    /// Maps a boolean health check to `True`/`False`.
    #[must_use]
    pub fn from_bool(healthy: bool) -> Self {
        if healthy { Self::True } else { Self::False }
    }
}

/// A named, reason-coded health signal attached to descriptor status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
}

impl Condition {
    /// Creates a condition in the `Unknown` state for the given generation.
    #[must_use]
    pub fn unknown(condition_type: impl Into<String>, generation: i64) -> Self {
        Self {
            condition_type: condition_type.into(),
            status: ConditionStatus::Unknown,
            reason: String::new(),
            message: String::new(),
            observed_generation: generation,
        }
    }

    /// Finalizes this condition with a status, reason and message.
    #[must_use]
    pub fn with_state(
        mut self,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.status = status;
        self.reason = reason.into();
        self.message = message.into();
        self
    }
}

/// Replaces the condition with the same type in place, or appends it.
///
/// Replacement preserves the position of first appearance so that repeated
/// passes produce a stable ordering and status equality checks stay
/// meaningful.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}
