//! VolumeReplication CRD
//!
//! The intent object: declares which replication role a volume or a volume
//! group should hold. The controller owns the status sub-resource and the
//! finalizer list; everything else is user input.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

// =============================================================================
// VolumeReplication CRD
// =============================================================================

/// VolumeReplication expresses the desired replication role of a
/// PersistentVolumeClaim or a VolumeGroup.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeReplication",
    plural = "volumereplications",
    shortname = "vr",
    status = "VolumeReplicationStatus",
    printcolumn = r#"{"name": "VolumeReplicationClass", "type": "string", "jsonPath": ".spec.volumeReplicationClass"}"#,
    printcolumn = r#"{"name": "DataSource", "type": "string", "jsonPath": ".spec.dataSource.name"}"#,
    printcolumn = r#"{"name": "DesiredState", "type": "string", "jsonPath": ".spec.replicationState"}"#,
    printcolumn = r#"{"name": "CurrentState", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicationSpec {
    /// Name of the cluster-scoped VolumeReplicationClass to use
    pub volume_replication_class: String,

    /// Desired replication state: primary, secondary or resync
    pub replication_state: String,

    /// Object being replicated (PersistentVolumeClaim or VolumeGroup)
    pub data_source: DataSourceReference,

    /// Existing replication identifier assigned by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_handle: Option<String>,

    /// Pass the force flag to resync while the volume is secondary
    #[serde(default)]
    pub auto_resync: bool,
}

/// Typed reference to the replicated object, in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceReference {
    /// API group of the referenced kind (empty for the core group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    /// Kind of the referenced object
    pub kind: String,
    /// Name of the referenced object
    pub name: String,
}

// =============================================================================
// Desired State
// =============================================================================

/// Replication state requested through `spec.replicationState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationState {
    Primary,
    Secondary,
    Resync,
}

impl FromStr for ReplicationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(ReplicationState::Primary),
            "secondary" => Ok(ReplicationState::Secondary),
            "resync" => Ok(ReplicationState::Resync),
            _ => Err(Error::Validation(format!(
                "unsupported volume state {:?}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationState::Primary => write!(f, "primary"),
            ReplicationState::Secondary => write!(f, "secondary"),
            ReplicationState::Resync => write!(f, "resync"),
        }
    }
}

impl ReplicationState {
    /// Status state recorded once this desired state has been applied
    pub fn applied_state(self) -> StatusState {
        match self {
            ReplicationState::Primary => StatusState::Primary,
            ReplicationState::Secondary | ReplicationState::Resync => StatusState::Secondary,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed replication state of a VolumeReplication
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicationStatus {
    /// Last durable replication role
    #[serde(default)]
    pub state: StatusState,

    /// Human readable outcome of the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation most recently reconciled to completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Start of the last reconcile that reached the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_start_time: Option<DateTime<Utc>>,

    /// Completion of the last fully successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_completion_time: Option<DateTime<Utc>>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<ReplicationCondition>,
}

/// Replication role as recorded in status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StatusState {
    #[default]
    #[serde(alias = "")]
    Unknown,
    Primary,
    Secondary,
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusState::Unknown => write!(f, "Unknown"),
            StatusState::Primary => write!(f, "Primary"),
            StatusState::Secondary => write!(f, "Secondary"),
        }
    }
}

/// Condition for volume replication status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationCondition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Generation of the object when the condition was recorded
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Condition types recorded by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Promoted,
    Demoted,
    Resynced,
    Degraded,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Promoted => write!(f, "Promoted"),
            ConditionType::Demoted => write!(f, "Demoted"),
            ConditionType::Resynced => write!(f, "Resynced"),
            ConditionType::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

// =============================================================================
// Implementations
// =============================================================================

impl VolumeReplication {
    /// Desired state parsed from the spec
    pub fn desired_state(&self) -> crate::error::Result<ReplicationState> {
        self.spec.replication_state.parse()
    }

    /// Replication role currently recorded in status
    pub fn current_state(&self) -> StatusState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Replication handle, ignoring empty strings
    pub fn replication_handle(&self) -> &str {
        self.spec.replication_handle.as_deref().unwrap_or_default()
    }

    /// Mutable status, created on first use
    pub fn status_mut(&mut self) -> &mut VolumeReplicationStatus {
        self.status.get_or_insert_with(VolumeReplicationStatus::default)
    }

    /// Generation of the object, zero when the API server has not set it
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }
}

impl VolumeReplicationStatus {
    /// Find a condition by type
    pub fn condition(&self, r#type: ConditionType) -> Option<&ReplicationCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Check whether a condition of the given type has the given status
    pub fn is_condition(&self, r#type: ConditionType, status: ConditionStatus) -> bool {
        self.condition(r#type).is_some_and(|c| c.status == status)
    }
}
