//! Domain Ports - Core trait definitions for the replication operator
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the Kubernetes object store and the replication driver.
//! Adapters implement these traits to provide concrete functionality.

use crate::crd::{VolumeGroup, VolumeGroupContent, VolumeReplication, VolumeReplicationClass};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Secret};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Replication Source
// =============================================================================

/// Driver-level object a replication relationship is addressed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationSource {
    /// A single volume, addressed by its volume handle
    Volume { volume_id: String },
    /// A volume group, addressed by its group handle
    VolumeGroup { volume_group_id: String },
}

impl ReplicationSource {
    /// Identifier of the addressed volume or group
    pub fn id(&self) -> &str {
        match self {
            ReplicationSource::Volume { volume_id } => volume_id,
            ReplicationSource::VolumeGroup { volume_group_id } => volume_group_id,
        }
    }
}

impl std::fmt::Display for ReplicationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationSource::Volume { volume_id } => write!(f, "volume/{}", volume_id),
            ReplicationSource::VolumeGroup { volume_group_id } => {
                write!(f, "volumegroup/{}", volume_group_id)
            }
        }
    }
}

// =============================================================================
// Replication Request/Response
// =============================================================================

/// Operations of the replication driver protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationOperation {
    Enable,
    Disable,
    Promote,
    Demote,
    Resync,
}

impl ReplicationOperation {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationOperation::Enable => "enable",
            ReplicationOperation::Disable => "disable",
            ReplicationOperation::Promote => "promote",
            ReplicationOperation::Demote => "demote",
            ReplicationOperation::Resync => "resync",
        }
    }
}

impl std::fmt::Display for ReplicationOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common parameters carried by every replication operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// Volume or group being replicated
    pub source: ReplicationSource,
    /// Driver-assigned replication identifier, empty when not known
    pub replication_id: String,
    /// Driver parameters with reserved keys stripped
    pub parameters: BTreeMap<String, String>,
    /// Credentials for the driver
    pub secrets: BTreeMap<String, String>,
}

/// Result of a resync request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncResponse {
    /// Whether the volume is fully synchronised and ready for use
    pub ready: bool,
}

// =============================================================================
// Replication Client Port
// =============================================================================

/// Port for the remote replication driver.
///
/// Implementations perform no retries; retry policy belongs to the reconciler.
#[async_trait]
pub trait ReplicationClient: Send + Sync {
    /// Establish a replication relationship (idempotent on the driver side)
    async fn enable_volume_replication(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError>;

    /// Tear down a replication relationship
    async fn disable_volume_replication(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError>;

    /// Make the volume the writable side of the relationship
    async fn promote_volume(
        &self,
        request: &ReplicationRequest,
        force: bool,
    ) -> std::result::Result<(), DriverError>;

    /// Make the volume the read-only side of the relationship
    async fn demote_volume(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError>;

    /// Resynchronise the volume from its peer
    async fn resync_volume(
        &self,
        request: &ReplicationRequest,
        force: bool,
    ) -> std::result::Result<ResyncResponse, DriverError>;
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Resource kinds that must be registered before the controller starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredKind {
    VolumeReplicationClass,
    VolumeReplication,
}

impl std::fmt::Display for RequiredKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequiredKind::VolumeReplicationClass => write!(f, "VolumeReplicationClass"),
            RequiredKind::VolumeReplication => write!(f, "VolumeReplication"),
        }
    }
}

/// Port for reads and writes against the cluster object store.
///
/// Lookups return `Ok(None)` when the object does not exist. Writes carry
/// the object's resource version and fail with [`crate::Error::Conflict`]
/// when it is stale. Finalizer writes and status writes are independent
/// paths against the same object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a VolumeReplication
    async fn get_volume_replication(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeReplication>>;

    /// Persist the finalizer list of a VolumeReplication
    async fn update_volume_replication_finalizers(
        &self,
        vr: &VolumeReplication,
    ) -> Result<VolumeReplication>;

    /// Persist the status sub-resource of a VolumeReplication
    async fn update_volume_replication_status(
        &self,
        vr: &VolumeReplication,
    ) -> Result<VolumeReplication>;

    /// Get a cluster-scoped VolumeReplicationClass
    async fn get_volume_replication_class(
        &self,
        name: &str,
    ) -> Result<Option<VolumeReplicationClass>>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Get a PersistentVolumeClaim
    async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>>;

    /// Persist the finalizer list of a PersistentVolumeClaim
    async fn update_persistent_volume_claim_finalizers(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    /// Get a cluster-scoped PersistentVolume
    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;

    /// Get a VolumeGroup
    async fn get_volume_group(&self, namespace: &str, name: &str) -> Result<Option<VolumeGroup>>;

    /// Persist the finalizer list of a VolumeGroup
    async fn update_volume_group_finalizers(&self, vg: &VolumeGroup) -> Result<VolumeGroup>;

    /// Get a VolumeGroupContent
    async fn get_volume_group_content(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroupContent>>;

    /// Check whether a required resource kind is served by the API server
    async fn is_kind_registered(&self, kind: RequiredKind) -> Result<bool>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ReplicationClientRef = Arc<dyn ReplicationClient>;
pub type ObjectStoreRef = Arc<dyn ObjectStore>;
