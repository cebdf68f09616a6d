//! Kubernetes-backed object store
//!
//! Finalizer and status writes are merge patches carrying the object's
//! resource version, so a stale copy fails with a conflict instead of
//! overwriting a newer object.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::crd::{VolumeGroup, VolumeGroupContent, VolumeReplication, VolumeReplicationClass};
use crate::domain::ports::{ObjectStore, RequiredKind};
use crate::error::{map_write_error, Error, Result};

/// [`ObjectStore`] over the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Patch the finalizer list of `meta`'s object, guarded by its resource version
async fn patch_finalizers<K>(api: &Api<K>, meta: &ObjectMeta, kind: &str) -> Result<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    let name = meta.name.clone().unwrap_or_default();
    let patch = json!({
        "metadata": {
            "finalizers": meta.finalizers.clone().unwrap_or_default(),
            "resourceVersion": meta.resource_version,
        }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| map_write_error(e, kind, &name))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_volume_replication(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeReplication>> {
        let api: Api<VolumeReplication> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_volume_replication_finalizers(
        &self,
        vr: &VolumeReplication,
    ) -> Result<VolumeReplication> {
        let api: Api<VolumeReplication> =
            self.namespaced(&vr.namespace().unwrap_or_default());
        patch_finalizers(&api, &vr.metadata, "VolumeReplication").await
    }

    async fn update_volume_replication_status(
        &self,
        vr: &VolumeReplication,
    ) -> Result<VolumeReplication> {
        let api: Api<VolumeReplication> =
            self.namespaced(&vr.namespace().unwrap_or_default());
        let name = vr.name_any();
        let patch = json!({
            "metadata": { "resourceVersion": vr.metadata.resource_version },
            "status": vr.status,
        });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(e, "VolumeReplication", &name))
    }

    async fn get_volume_replication_class(
        &self,
        name: &str,
    ) -> Result<Option<VolumeReplicationClass>> {
        let api: Api<VolumeReplicationClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_persistent_volume_claim_finalizers(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> =
            self.namespaced(&pvc.namespace().unwrap_or_default());
        patch_finalizers(&api, &pvc.metadata, "PersistentVolumeClaim").await
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_volume_group(&self, namespace: &str, name: &str) -> Result<Option<VolumeGroup>> {
        let api: Api<VolumeGroup> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_volume_group_finalizers(&self, vg: &VolumeGroup) -> Result<VolumeGroup> {
        let api: Api<VolumeGroup> = self.namespaced(&vg.namespace().unwrap_or_default());
        patch_finalizers(&api, &vg.metadata, "VolumeGroup").await
    }

    async fn get_volume_group_content(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroupContent>> {
        let api: Api<VolumeGroupContent> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn is_kind_registered(&self, kind: RequiredKind) -> Result<bool> {
        let params = ListParams::default().limit(1);
        let listed = match kind {
            RequiredKind::VolumeReplicationClass => Api::<VolumeReplicationClass>::all(
                self.client.clone(),
            )
            .list(&params)
            .await
            .map(|_| ()),
            RequiredKind::VolumeReplication => Api::<VolumeReplication>::all(self.client.clone())
                .list(&params)
                .await
                .map(|_| ()),
        };
        match listed {
            Ok(()) => Ok(true),
            // The API server does not serve the resource yet
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(Error::Kube(e)),
        }
    }
}
