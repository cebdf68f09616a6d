//! In-memory test doubles for the object store and the replication driver

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PersistentVolumeSpec, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use parking_lot::Mutex;

use crate::crd::{
    DataSourceReference, VolumeGroup, VolumeGroupContent, VolumeGroupContentSource,
    VolumeGroupContentSpec, VolumeGroupSource, VolumeGroupSpec, VolumeReplication,
    VolumeReplicationClass, VolumeReplicationClassSpec, VolumeReplicationSpec,
};
use crate::domain::ports::{
    ObjectStore, ReplicationClient, ReplicationOperation, ReplicationRequest, RequiredKind,
    ResyncResponse,
};
use crate::error::{DriverError, Error, Result};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

// =============================================================================
// Fake Object Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    volume_replications: BTreeMap<Key, VolumeReplication>,
    classes: BTreeMap<String, VolumeReplicationClass>,
    secrets: BTreeMap<Key, Secret>,
    claims: BTreeMap<Key, PersistentVolumeClaim>,
    volumes: BTreeMap<String, PersistentVolume>,
    groups: BTreeMap<Key, VolumeGroup>,
    group_contents: BTreeMap<Key, VolumeGroupContent>,
    // Remaining negative answers per kind before it reports as registered
    unregistered: HashMap<RequiredKind, u32>,
    kind_checks: u32,
    resource_version: u64,
    main_conflicts: u32,
    status_conflicts: u32,
    // Kind and name of every finalizer write, in order
    finalizer_writes: Vec<(String, String)>,
    status_writes: u32,
}

impl StoreState {
    fn stamp(&mut self, meta: &mut ObjectMeta) {
        self.resource_version += 1;
        meta.resource_version = Some(self.resource_version.to_string());
    }

    fn take_main_conflict(&mut self, kind: &str, name: &str) -> Result<()> {
        if self.main_conflicts > 0 {
            self.main_conflicts -= 1;
            return Err(conflict(kind, name));
        }
        Ok(())
    }

    fn take_status_conflict(&mut self, kind: &str, name: &str) -> Result<()> {
        if self.status_conflicts > 0 {
            self.status_conflicts -= 1;
            return Err(conflict(kind, name));
        }
        Ok(())
    }
}

fn conflict(kind: &str, name: &str) -> Error {
    Error::Conflict {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta, kind: &str) -> Result<()> {
    if incoming.resource_version.is_some() && stored.resource_version != incoming.resource_version
    {
        return Err(conflict(kind, stored.name.as_deref().unwrap_or_default()));
    }
    Ok(())
}

fn missing(kind: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Object store with optimistic concurrency and independent conflict
/// injection on the main and status write paths
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_volume_replication(&self, mut vr: VolumeReplication) -> VolumeReplication {
        let mut state = self.state.lock();
        state.stamp(&mut vr.metadata);
        state
            .volume_replications
            .insert(meta_key(&vr.metadata), vr.clone());
        vr
    }

    pub fn insert_class(&self, mut class: VolumeReplicationClass) {
        let mut state = self.state.lock();
        state.stamp(&mut class.metadata);
        state.classes.insert(class.name_any(), class);
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = self.state.lock();
        state.stamp(&mut secret.metadata);
        state.secrets.insert(meta_key(&secret.metadata), secret);
    }

    pub fn insert_claim(&self, mut pvc: PersistentVolumeClaim) -> PersistentVolumeClaim {
        let mut state = self.state.lock();
        state.stamp(&mut pvc.metadata);
        state.claims.insert(meta_key(&pvc.metadata), pvc.clone());
        pvc
    }

    pub fn insert_volume(&self, mut pv: PersistentVolume) {
        let mut state = self.state.lock();
        state.stamp(&mut pv.metadata);
        state.volumes.insert(pv.name_any(), pv);
    }

    pub fn insert_group(&self, mut vg: VolumeGroup) -> VolumeGroup {
        let mut state = self.state.lock();
        state.stamp(&mut vg.metadata);
        state.groups.insert(meta_key(&vg.metadata), vg.clone());
        vg
    }

    pub fn insert_group_content(&self, mut vgc: VolumeGroupContent) {
        let mut state = self.state.lock();
        state.stamp(&mut vgc.metadata);
        state.group_contents.insert(meta_key(&vgc.metadata), vgc);
    }

    pub fn remove_claim(&self, namespace: &str, name: &str) {
        self.state.lock().claims.remove(&key(namespace, name));
    }

    /// Set the deletion timestamp the way the API server does for an
    /// object that still carries finalizers
    pub fn mark_for_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let Some(mut vr) = state.volume_replications.get(&key(namespace, name)).cloned() else {
            return;
        };
        vr.metadata.deletion_timestamp = Some(Time(Utc::now()));
        state.stamp(&mut vr.metadata);
        state.volume_replications.insert(key(namespace, name), vr);
    }

    /// Change the desired state as a user edit would
    pub fn set_desired_state(&self, namespace: &str, name: &str, desired: &str) {
        let mut state = self.state.lock();
        let Some(mut vr) = state.volume_replications.get(&key(namespace, name)).cloned() else {
            return;
        };
        vr.spec.replication_state = desired.to_string();
        vr.metadata.generation = Some(vr.metadata.generation.unwrap_or_default() + 1);
        state.stamp(&mut vr.metadata);
        state.volume_replications.insert(key(namespace, name), vr);
    }

    pub fn volume_replication(&self, namespace: &str, name: &str) -> Option<VolumeReplication> {
        self.state
            .lock()
            .volume_replications
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state.lock().claims.get(&key(namespace, name)).cloned()
    }

    pub fn group(&self, namespace: &str, name: &str) -> Option<VolumeGroup> {
        self.state.lock().groups.get(&key(namespace, name)).cloned()
    }

    /// Fail the next `n` writes to finalizer lists
    pub fn fail_main_writes(&self, n: u32) {
        self.state.lock().main_conflicts = n;
    }

    /// Fail the next `n` status writes
    pub fn fail_status_writes(&self, n: u32) {
        self.state.lock().status_conflicts = n;
    }

    /// Report `kind` as missing for the next `checks` lookups
    pub fn unregister_kind(&self, kind: RequiredKind, checks: u32) {
        self.state.lock().unregistered.insert(kind, checks);
    }

    pub fn main_writes(&self) -> u32 {
        self.state.lock().finalizer_writes.len() as u32
    }

    /// `(kind, name)` of each finalizer write in the order it was made
    pub fn finalizer_writes(&self) -> Vec<(String, String)> {
        self.state.lock().finalizer_writes.clone()
    }

    pub fn status_writes(&self) -> u32 {
        self.state.lock().status_writes
    }

    pub fn kind_checks(&self) -> u32 {
        self.state.lock().kind_checks
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_volume_replication(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeReplication>> {
        Ok(self.volume_replication(namespace, name))
    }

    async fn update_volume_replication_finalizers(
        &self,
        vr: &VolumeReplication,
    ) -> Result<VolumeReplication> {
        let mut state = self.state.lock();
        let name = vr.name_any();
        state.take_main_conflict("VolumeReplication", &name)?;
        let k = meta_key(&vr.metadata);
        let mut updated = state
            .volume_replications
            .get(&k)
            .cloned()
            .ok_or_else(|| missing("VolumeReplication", &name))?;
        check_version(&updated.metadata, &vr.metadata, "VolumeReplication")?;

        state.finalizer_writes.push(("VolumeReplication".to_string(), name.clone()));
        updated.metadata.finalizers = vr.metadata.finalizers.clone();
        let released = updated
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, Vec::is_empty);
        if updated.metadata.deletion_timestamp.is_some() && released {
            state.volume_replications.remove(&k);
            return Ok(updated);
        }
        state.stamp(&mut updated.metadata);
        state.volume_replications.insert(k, updated.clone());
        Ok(updated)
    }

    async fn update_volume_replication_status(
        &self,
        vr: &VolumeReplication,
    ) -> Result<VolumeReplication> {
        let mut state = self.state.lock();
        let name = vr.name_any();
        state.take_status_conflict("VolumeReplication", &name)?;
        let k = meta_key(&vr.metadata);
        let mut updated = state
            .volume_replications
            .get(&k)
            .cloned()
            .ok_or_else(|| missing("VolumeReplication", &name))?;
        check_version(&updated.metadata, &vr.metadata, "VolumeReplication")?;

        state.status_writes += 1;
        updated.status = vr.status.clone();
        state.stamp(&mut updated.metadata);
        state.volume_replications.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_volume_replication_class(
        &self,
        name: &str,
    ) -> Result<Option<VolumeReplicationClass>> {
        Ok(self.state.lock().classes.get(name).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.state.lock().secrets.get(&key(namespace, name)).cloned())
    }

    async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claim(namespace, name))
    }

    async fn update_persistent_volume_claim_finalizers(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let mut state = self.state.lock();
        let name = pvc.name_any();
        state.take_main_conflict("PersistentVolumeClaim", &name)?;
        let k = meta_key(&pvc.metadata);
        let mut updated = state
            .claims
            .get(&k)
            .cloned()
            .ok_or_else(|| missing("PersistentVolumeClaim", &name))?;
        check_version(&updated.metadata, &pvc.metadata, "PersistentVolumeClaim")?;

        state.finalizer_writes.push(("PersistentVolumeClaim".to_string(), name.clone()));
        updated.metadata.finalizers = pvc.metadata.finalizers.clone();
        state.stamp(&mut updated.metadata);
        state.claims.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.state.lock().volumes.get(name).cloned())
    }

    async fn get_volume_group(&self, namespace: &str, name: &str) -> Result<Option<VolumeGroup>> {
        Ok(self.group(namespace, name))
    }

    async fn update_volume_group_finalizers(&self, vg: &VolumeGroup) -> Result<VolumeGroup> {
        let mut state = self.state.lock();
        let name = vg.name_any();
        state.take_main_conflict("VolumeGroup", &name)?;
        let k = meta_key(&vg.metadata);
        let mut updated = state
            .groups
            .get(&k)
            .cloned()
            .ok_or_else(|| missing("VolumeGroup", &name))?;
        check_version(&updated.metadata, &vg.metadata, "VolumeGroup")?;

        state.finalizer_writes.push(("VolumeGroup".to_string(), name.clone()));
        updated.metadata.finalizers = vg.metadata.finalizers.clone();
        state.stamp(&mut updated.metadata);
        state.groups.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_volume_group_content(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroupContent>> {
        Ok(self
            .state
            .lock()
            .group_contents
            .get(&key(namespace, name))
            .cloned())
    }

    async fn is_kind_registered(&self, kind: RequiredKind) -> Result<bool> {
        let mut state = self.state.lock();
        state.kind_checks += 1;
        match state.unregistered.get_mut(&kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

// =============================================================================
// Fake Replication Driver
// =============================================================================

/// A driver call as observed by [`FakeReplicationClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Enable,
    Disable,
    Promote { force: bool },
    Demote,
    Resync { force: bool },
}

#[derive(Default)]
struct DriverState {
    calls: Vec<DriverCall>,
    requests: Vec<ReplicationRequest>,
    errors: HashMap<ReplicationOperation, VecDeque<DriverError>>,
    resync_ready: VecDeque<bool>,
}

/// Scripted driver: every call succeeds unless an error was queued for its
/// operation; resync reports ready unless told otherwise
#[derive(Default)]
pub struct FakeReplicationClient {
    state: Mutex<DriverState>,
}

impl FakeReplicationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a gRPC status for the next call of `operation`
    pub fn push_error(&self, operation: ReplicationOperation, status: tonic::Status) {
        self.push_driver_error(operation, DriverError::Status(status));
    }

    /// Queue any driver error for the next call of `operation`
    pub fn push_driver_error(&self, operation: ReplicationOperation, error: DriverError) {
        self.state
            .lock()
            .errors
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Queue the `ready` flag of the next successful resync
    pub fn push_resync_ready(&self, ready: bool) {
        self.state.lock().resync_ready.push_back(ready);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    pub fn last_request(&self) -> Option<ReplicationRequest> {
        self.state.lock().requests.last().cloned()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(
        &self,
        call: DriverCall,
        operation: ReplicationOperation,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.requests.push(request.clone());
        match state.errors.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReplicationClient for FakeReplicationClient {
    async fn enable_volume_replication(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::Enable, ReplicationOperation::Enable, request)
    }

    async fn disable_volume_replication(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::Disable, ReplicationOperation::Disable, request)
    }

    async fn promote_volume(
        &self,
        request: &ReplicationRequest,
        force: bool,
    ) -> std::result::Result<(), DriverError> {
        self.record(
            DriverCall::Promote { force },
            ReplicationOperation::Promote,
            request,
        )
    }

    async fn demote_volume(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::Demote, ReplicationOperation::Demote, request)
    }

    async fn resync_volume(
        &self,
        request: &ReplicationRequest,
        force: bool,
    ) -> std::result::Result<ResyncResponse, DriverError> {
        self.record(
            DriverCall::Resync { force },
            ReplicationOperation::Resync,
            request,
        )?;
        let ready = self.state.lock().resync_ready.pop_front().unwrap_or(true);
        Ok(ResyncResponse { ready })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn volume_replication(
    namespace: &str,
    name: &str,
    desired: &str,
    kind: &str,
    source: &str,
) -> VolumeReplication {
    let mut vr = VolumeReplication::new(
        name,
        VolumeReplicationSpec {
            volume_replication_class: "replication-class".to_string(),
            replication_state: desired.to_string(),
            data_source: DataSourceReference {
                api_group: None,
                kind: kind.to_string(),
                name: source.to_string(),
            },
            replication_handle: None,
            auto_resync: false,
        },
    );
    vr.metadata.namespace = Some(namespace.to_string());
    vr.metadata.generation = Some(1);
    vr
}

pub fn replication_class(
    name: &str,
    provisioner: &str,
    parameters: &[(&str, &str)],
) -> VolumeReplicationClass {
    VolumeReplicationClass::new(
        name,
        VolumeReplicationClassSpec {
            provisioner: provisioner.to_string(),
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
    )
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Insert a claim bound to a CSI volume with the given handle
pub fn bound_claim(
    store: &FakeStore,
    namespace: &str,
    name: &str,
    volume: &str,
    handle: &str,
) -> PersistentVolumeClaim {
    store.insert_volume(PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: "rbd.csi.ceph.com".to_string(),
                volume_handle: handle.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    store.insert_claim(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: Some(volume.to_string()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        }),
    })
}

/// Insert a volume group bound to content with the given group handle
pub fn group_with_content(
    store: &FakeStore,
    namespace: &str,
    name: &str,
    content: &str,
    handle: &str,
) -> VolumeGroup {
    let mut vgc = VolumeGroupContent::new(
        content,
        VolumeGroupContentSpec {
            volume_group_class_name: None,
            source: Some(VolumeGroupContentSource {
                driver: "rbd.csi.ceph.com".to_string(),
                volume_group_handle: handle.to_string(),
            }),
        },
    );
    vgc.metadata.namespace = Some(namespace.to_string());
    store.insert_group_content(vgc);

    let mut vg = VolumeGroup::new(
        name,
        VolumeGroupSpec {
            volume_group_class_name: None,
            source: VolumeGroupSource {
                volume_group_content_name: Some(content.to_string()),
            },
        },
    );
    vg.metadata.namespace = Some(namespace.to_string());
    store.insert_group(vg)
}
