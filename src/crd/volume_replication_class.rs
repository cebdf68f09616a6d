//! VolumeReplicationClass CRD
//!
//! Cluster-scoped configuration binding intent objects to a replication
//! driver and the parameters forwarded to it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// VolumeReplicationClass names the driver (provisioner) responsible for a
/// set of intent objects and carries driver parameters.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeReplicationClass",
    plural = "volumereplicationclasses",
    shortname = "vrc",
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicationClassSpec {
    /// Name of the replication driver
    pub provisioner: String,

    /// Parameters for the driver; keys under the reserved prefix are
    /// consumed by the controller itself
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl VolumeReplicationClass {
    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Check whether the class belongs to the given driver
    pub fn is_owned_by(&self, driver_name: &str) -> bool {
        self.spec.provisioner == driver_name
    }
}
