//! Startup dependency check

use std::time::Duration;

use tracing::{debug, info};

use crate::domain::ports::{ObjectStore, RequiredKind};
use crate::error::Result;

/// Kinds the controller needs before it can accept reconcile requests
pub const REQUIRED_KINDS: [RequiredKind; 2] = [
    RequiredKind::VolumeReplicationClass,
    RequiredKind::VolumeReplication,
];

/// Block until every required kind is served by the API server.
///
/// Errors other than "not registered" end the wait.
pub async fn wait_for_crds(store: &dyn ObjectStore, interval: Duration) -> Result<()> {
    for kind in REQUIRED_KINDS {
        loop {
            if store.is_kind_registered(kind).await? {
                debug!(%kind, "Required resource is registered");
                break;
            }
            info!(%kind, retry_in = ?interval, "Required resource does not exist yet");
            tokio::time::sleep(interval).await;
        }
    }
    info!("All required resources are registered");
    Ok(())
}
