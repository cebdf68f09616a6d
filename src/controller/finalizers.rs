//! Finalizer Manager
//!
//! Idempotent add and remove of the protection tokens carried by the intent
//! object and by the claim or group it replicates. Unchanged lists never
//! cause a write.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::info;

use crate::controller::datasource::{DataSourceKind, DataSourceObject};
use crate::crd::VolumeReplication;
use crate::domain::ports::ObjectStore;
use crate::error::Result;

/// Held by a VolumeReplication until replication has been disabled
pub const VOLUME_REPLICATION_FINALIZER: &str = "replication.storage.openshift.io";

/// Held by a PersistentVolumeClaim while it is replicated
pub const PVC_REPLICATION_FINALIZER: &str = "replication.storage.openshift.io/pvc-protection";

/// Held by a VolumeGroup while it is replicated
pub const VG_REPLICATION_FINALIZER: &str = "replication.storage.openshift.io/vg-protection";

/// Token protecting a data source of the given kind
pub fn data_source_finalizer(kind: DataSourceKind) -> &'static str {
    match kind {
        DataSourceKind::SingleVolume => PVC_REPLICATION_FINALIZER,
        DataSourceKind::VolumeGroup => VG_REPLICATION_FINALIZER,
    }
}

/// Add `token` to the finalizer list, returning whether the list changed
pub fn add_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == token) {
        return false;
    }
    finalizers.push(token.to_string());
    true
}

/// Remove `token` from the finalizer list, returning whether the list changed
pub fn remove_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    match meta.finalizers.as_mut() {
        Some(finalizers) if finalizers.iter().any(|f| f == token) => {
            finalizers.retain(|f| f != token);
            true
        }
        _ => false,
    }
}

pub fn has_finalizer(meta: &ObjectMeta, token: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|t| t == token))
}

/// Persists finalizer changes through the object store.
///
/// Every method replaces the caller's copy with the object returned by the
/// store so later writes carry the current resource version.
pub struct FinalizerManager<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> FinalizerManager<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Ensure the intent finalizer is present
    pub async fn protect_intent(&self, vr: &mut VolumeReplication) -> Result<()> {
        if !add_finalizer(&mut vr.metadata, VOLUME_REPLICATION_FINALIZER) {
            return Ok(());
        }
        info!(
            name = %vr.name_any(),
            finalizer = VOLUME_REPLICATION_FINALIZER,
            "Adding finalizer to VolumeReplication"
        );
        *vr = self.store.update_volume_replication_finalizers(vr).await?;
        Ok(())
    }

    /// Drop the intent finalizer, which lets the API server delete the object
    pub async fn release_intent(&self, vr: &mut VolumeReplication) -> Result<()> {
        if !remove_finalizer(&mut vr.metadata, VOLUME_REPLICATION_FINALIZER) {
            return Ok(());
        }
        info!(
            name = %vr.name_any(),
            finalizer = VOLUME_REPLICATION_FINALIZER,
            "Removing finalizer from VolumeReplication"
        );
        *vr = self.store.update_volume_replication_finalizers(vr).await?;
        Ok(())
    }

    /// Ensure the protection finalizer of the data source is present
    pub async fn protect_data_source(&self, object: &mut DataSourceObject) -> Result<()> {
        let token = data_source_finalizer(object.kind());
        match object {
            DataSourceObject::Claim(pvc) => {
                if add_finalizer(&mut pvc.metadata, token) {
                    info!(claim = %pvc.name_any(), finalizer = token, "Adding finalizer to PersistentVolumeClaim");
                    *pvc = self.store.update_persistent_volume_claim_finalizers(pvc).await?;
                }
            }
            DataSourceObject::Group(vg) => {
                if add_finalizer(&mut vg.metadata, token) {
                    info!(group = %vg.name_any(), finalizer = token, "Adding finalizer to VolumeGroup");
                    *vg = self.store.update_volume_group_finalizers(vg).await?;
                }
            }
        }
        Ok(())
    }

    /// Drop the protection finalizer of the data source
    pub async fn release_data_source(&self, object: &mut DataSourceObject) -> Result<()> {
        let token = data_source_finalizer(object.kind());
        match object {
            DataSourceObject::Claim(pvc) => {
                if remove_finalizer(&mut pvc.metadata, token) {
                    info!(claim = %pvc.name_any(), finalizer = token, "Removing finalizer from PersistentVolumeClaim");
                    *pvc = self.store.update_persistent_volume_claim_finalizers(pvc).await?;
                }
            }
            DataSourceObject::Group(vg) => {
                if remove_finalizer(&mut vg.metadata, token) {
                    info!(group = %vg.name_any(), finalizer = token, "Removing finalizer from VolumeGroup");
                    *vg = self.store.update_volume_group_finalizers(vg).await?;
                }
            }
        }
        Ok(())
    }
}

/// Check whether the data source still carries its protection finalizer
pub fn is_data_source_protected(object: &DataSourceObject) -> bool {
    let token = data_source_finalizer(object.kind());
    object.finalizers().iter().any(|f| f == token)
}
