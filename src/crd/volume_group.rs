//! VolumeGroup and VolumeGroupContent
//!
//! Resources of the volume group operator. The controller only reads them
//! and manages its protection finalizer on VolumeGroup; the schemas below
//! cover the fields it needs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A group of claims replicated together
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi.ibm.com",
    version = "v1",
    kind = "VolumeGroup",
    plural = "volumegroups",
    status = "VolumeGroupStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_class_name: Option<String>,

    #[serde(default)]
    pub source: VolumeGroupSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSource {
    /// Bound content object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_content_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_volume_group_content_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

/// Backing object of a VolumeGroup, carrying the driver handle
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi.ibm.com",
    version = "v1",
    kind = "VolumeGroupContent",
    plural = "volumegroupcontents",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupContentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeGroupContentSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupContentSource {
    /// Driver that created the group
    pub driver: String,
    /// Driver-level identifier of the group
    pub volume_group_handle: String,
}

impl VolumeGroup {
    /// Name of the content object this group is bound to
    pub fn content_name(&self) -> Option<&str> {
        self.spec
            .source
            .volume_group_content_name
            .as_deref()
            .filter(|n| !n.is_empty())
    }
}

impl VolumeGroupContent {
    /// Driver group handle, if the content has been provisioned
    pub fn group_handle(&self) -> Option<&str> {
        self.spec
            .source
            .as_ref()
            .map(|s| s.volume_group_handle.as_str())
            .filter(|h| !h.is_empty())
    }
}
