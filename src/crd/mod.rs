//! Custom Resource Definitions for volume replication
//!
//! This module contains all resource types:
//! - VolumeReplication: Desired replication state of a claim or group
//! - VolumeReplicationClass: Driver binding and parameters
//! - VolumeGroup / VolumeGroupContent: Volume group resources (read only)

pub mod volume_group;
pub mod volume_replication;
pub mod volume_replication_class;

pub use volume_group::*;
pub use volume_replication::*;
pub use volume_replication_class::*;

use kube::CustomResourceExt;

/// Render the CRDs owned by this operator as a multi-document YAML stream
pub fn owned_crds_yaml() -> crate::error::Result<String> {
    let docs = [
        serde_yaml::to_string(&VolumeReplicationClass::crd())?,
        serde_yaml::to_string(&VolumeReplication::crd())?,
    ];
    Ok(docs.join("---\n"))
}
