//! Data-Source Resolver
//!
//! Turns the `dataSource` reference of a VolumeReplication into the
//! driver-level handle of the replicated volume or volume group.

use std::str::FromStr;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::{DataSourceReference, VolumeGroup, VolumeReplication};
use crate::domain::ports::{ObjectStore, ReplicationSource};
use crate::error::{Error, Result};

pub const PVC_DATA_SOURCE: &str = "PersistentVolumeClaim";
pub const VOLUME_GROUP_DATA_SOURCE: &str = "VolumeGroup";

/// Kinds of object a VolumeReplication can replicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    SingleVolume,
    VolumeGroup,
}

impl FromStr for DataSourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            PVC_DATA_SOURCE => Ok(DataSourceKind::SingleVolume),
            VOLUME_GROUP_DATA_SOURCE => Ok(DataSourceKind::VolumeGroup),
            other => Err(Error::Validation(format!(
                "unsupported datasource kind {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSourceKind::SingleVolume => f.write_str(PVC_DATA_SOURCE),
            DataSourceKind::VolumeGroup => f.write_str(VOLUME_GROUP_DATA_SOURCE),
        }
    }
}

/// Object protected by the replication relationship
#[derive(Debug, Clone)]
pub enum DataSourceObject {
    Claim(PersistentVolumeClaim),
    Group(VolumeGroup),
}

impl DataSourceObject {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            DataSourceObject::Claim(_) => DataSourceKind::SingleVolume,
            DataSourceObject::Group(_) => DataSourceKind::VolumeGroup,
        }
    }

    pub fn name(&self) -> String {
        match self {
            DataSourceObject::Claim(pvc) => pvc.name_any(),
            DataSourceObject::Group(vg) => vg.name_any(),
        }
    }

    pub fn finalizers(&self) -> &[String] {
        match self {
            DataSourceObject::Claim(pvc) => pvc.finalizers(),
            DataSourceObject::Group(vg) => vg.finalizers(),
        }
    }
}

/// Outcome of resolving a data source
#[derive(Debug, Clone)]
pub struct ResolvedDataSource {
    pub object: DataSourceObject,
    pub volume_handle: String,
}

impl ResolvedDataSource {
    /// Replication source addressed by driver operations
    pub fn replication_source(&self) -> ReplicationSource {
        match self.object.kind() {
            DataSourceKind::SingleVolume => ReplicationSource::Volume {
                volume_id: self.volume_handle.clone(),
            },
            DataSourceKind::VolumeGroup => ReplicationSource::VolumeGroup {
                volume_group_id: self.volume_handle.clone(),
            },
        }
    }
}

/// Resolve a data source reference in the given namespace
pub async fn resolve(
    store: &dyn ObjectStore,
    namespace: &str,
    reference: &DataSourceReference,
) -> Result<ResolvedDataSource> {
    match reference.kind.parse::<DataSourceKind>()? {
        DataSourceKind::SingleVolume => resolve_claim(store, namespace, &reference.name).await,
        DataSourceKind::VolumeGroup => resolve_group(store, namespace, &reference.name).await,
    }
}

async fn resolve_claim(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<ResolvedDataSource> {
    let pvc = store
        .get_persistent_volume_claim(namespace, name)
        .await?
        .ok_or_else(|| not_found(PVC_DATA_SOURCE, namespace, name))?;

    let phase = pvc.status.as_ref().and_then(|s| s.phase.as_deref());
    let volume_name = pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .filter(|v| !v.is_empty());
    let volume_name = match (phase, volume_name) {
        (Some("Bound"), Some(volume_name)) => volume_name.to_string(),
        _ => {
            return Err(Error::DataSourceNotBound {
                kind: PVC_DATA_SOURCE.to_string(),
                name: format!("{}/{}", namespace, name),
            })
        }
    };

    let pv = store
        .get_persistent_volume(&volume_name)
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            kind: "PersistentVolume".to_string(),
            name: volume_name.clone(),
        })?;

    let volume_handle = pv
        .spec
        .as_ref()
        .and_then(|s| s.csi.as_ref())
        .map(|csi| csi.volume_handle.clone())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::MissingVolumeHandle {
            kind: "PersistentVolume".to_string(),
            name: volume_name.clone(),
            reason: "volume is not provisioned by a CSI driver".to_string(),
        })?;

    debug!(claim = %name, volume = %volume_name, handle = %volume_handle, "Resolved claim");
    Ok(ResolvedDataSource {
        object: DataSourceObject::Claim(pvc),
        volume_handle,
    })
}

async fn resolve_group(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<ResolvedDataSource> {
    let vg = store
        .get_volume_group(namespace, name)
        .await?
        .ok_or_else(|| not_found(VOLUME_GROUP_DATA_SOURCE, namespace, name))?;

    let content_name = vg
        .content_name()
        .ok_or_else(|| Error::DataSourceNotBound {
            kind: VOLUME_GROUP_DATA_SOURCE.to_string(),
            name: format!("{}/{}", namespace, name),
        })?
        .to_string();

    let vgc = store
        .get_volume_group_content(namespace, &content_name)
        .await?
        .ok_or_else(|| not_found("VolumeGroupContent", namespace, &content_name))?;

    let volume_handle = vgc
        .group_handle()
        .ok_or_else(|| Error::MissingVolumeHandle {
            kind: "VolumeGroupContent".to_string(),
            name: content_name.clone(),
            reason: "content has no volume group handle".to_string(),
        })?
        .to_string();

    debug!(group = %name, content = %content_name, handle = %volume_handle, "Resolved volume group");
    Ok(ResolvedDataSource {
        object: DataSourceObject::Group(vg),
        volume_handle,
    })
}

fn not_found(kind: &str, namespace: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: format!("{}/{}", namespace, name),
    }
}

/// Check whether a resolution error leaves no handle the driver could be
/// addressed with.
///
/// Covers a missing claim or group, an unbound or lost claim, and a missing
/// or non-CSI volume or group content.
pub fn is_unaddressable(err: &Error) -> bool {
    match err {
        Error::ResourceNotFound { kind, .. } => matches!(
            kind.as_str(),
            PVC_DATA_SOURCE | VOLUME_GROUP_DATA_SOURCE | "PersistentVolume" | "VolumeGroupContent"
        ),
        Error::DataSourceNotBound { .. } | Error::MissingVolumeHandle { .. } => true,
        _ => false,
    }
}

/// Fetch the referenced claim or group without resolving its handle
pub async fn lookup(
    store: &dyn ObjectStore,
    namespace: &str,
    reference: &DataSourceReference,
) -> Result<Option<DataSourceObject>> {
    let object = match reference.kind.parse::<DataSourceKind>()? {
        DataSourceKind::SingleVolume => store
            .get_persistent_volume_claim(namespace, &reference.name)
            .await?
            .map(DataSourceObject::Claim),
        DataSourceKind::VolumeGroup => store
            .get_volume_group(namespace, &reference.name)
            .await?
            .map(DataSourceObject::Group),
    };
    Ok(object)
}

/// Intent objects in `namespace` whose data source is the named object.
///
/// Used to map claim and group watch events back to reconcile requests.
pub fn referencing_intents<'a, I>(
    intents: I,
    kind: DataSourceKind,
    namespace: &'a str,
    name: &'a str,
) -> impl Iterator<Item = &'a VolumeReplication> + 'a
where
    I: IntoIterator<Item = &'a VolumeReplication>,
    I::IntoIter: 'a,
{
    intents.into_iter().filter(move |vr| {
        vr.namespace().as_deref() == Some(namespace)
            && vr.spec.data_source.name == name
            && vr.spec.data_source.kind.parse::<DataSourceKind>().ok() == Some(kind)
    })
}
