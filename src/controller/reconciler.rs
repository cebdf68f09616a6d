//! Replication State Machine
//!
//! Reconciles one VolumeReplication against the replication driver. The
//! status sub-resource is the only memory carried between passes, so every
//! pass re-reads the object, the class, the secret and the data source
//! before deciding which driver operations to issue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument, warn};

use crate::config::DriverConfig;
use crate::controller::conditions::{
    set_demoted, set_degraded, set_failed_demotion, set_failed_promotion, set_failed_resync,
    set_failure, set_not_degraded, set_promoted, set_resynced,
};
use crate::controller::datasource::{self, is_unaddressable, DataSourceObject};
use crate::controller::finalizers::{
    has_finalizer, is_data_source_protected, FinalizerManager, VOLUME_REPLICATION_FINALIZER,
};
use crate::controller::parameters::{
    driver_parameters, secret_data, secret_reference, validate_prefixed_parameters,
};
use crate::crd::{ReplicationState, StatusState, VolumeReplication, VolumeReplicationClass};
use crate::domain::ports::{ObjectStoreRef, ReplicationClientRef, ReplicationRequest};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::replication::ReplicationSession;

/// Delay after the first demotion, and after failures of a secondary volume
pub const SECONDARY_REQUEUE: Duration = Duration::from_secs(15);

/// Delay while a resync reports the volume as not ready
pub const RESYNC_REQUEUE: Duration = Duration::from_secs(30);

const SECONDARY_DEGRADED_MESSAGE: &str = "volume is marked secondary and is degraded";
const DEGRADED_MESSAGE: &str = "volume is degraded";
const RESYNCING_MESSAGE: &str = "volume is marked for resyncing";

/// Result of driving the desired state through the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    /// The desired state is in place
    Complete,
    /// First demotion done, resync deferred to a later pass
    Demoted,
    /// Resync accepted but the volume is not ready yet
    ResyncPending,
}

/// Reconciler for VolumeReplication objects bound to one driver
pub struct Reconciler {
    store: ObjectStoreRef,
    client: ReplicationClientRef,
    config: Arc<DriverConfig>,
    metrics: Option<Metrics>,
}

impl Reconciler {
    pub fn new(store: ObjectStoreRef, client: ReplicationClientRef, config: Arc<DriverConfig>) -> Self {
        Self {
            store,
            client,
            config,
            metrics: None,
        }
    }

    /// Record driver operations in the given collectors
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Reconcile the VolumeReplication `namespace/name`
    #[instrument(skip(self), fields(driver = %self.config.driver_name))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(mut vr) = self.store.get_volume_replication(namespace, name).await? else {
            info!("VolumeReplication not found, assuming it was deleted");
            return Ok(Action::await_change());
        };

        let class_name = vr.spec.volume_replication_class.clone();
        let Some(class) = self.store.get_volume_replication_class(&class_name).await? else {
            let err = Error::ResourceNotFound {
                kind: "VolumeReplicationClass".to_string(),
                name: class_name,
            };
            return self.fail(&mut vr, err).await;
        };

        if !class.is_owned_by(&self.config.driver_name) {
            debug!(
                class = %class.name(),
                provisioner = %class.spec.provisioner,
                "VolumeReplicationClass belongs to another driver, skipping"
            );
            return Ok(Action::await_change());
        }

        if let Err(err) = validate_prefixed_parameters(&class.spec.parameters) {
            return self.fail(&mut vr, err).await;
        }
        let parameters = driver_parameters(&class.spec.parameters);
        let secrets = match self.load_secrets(&class).await {
            Ok(secrets) => secrets,
            Err(err) => return self.fail(&mut vr, err).await,
        };

        let deleting = vr.metadata.deletion_timestamp.is_some();
        let finalizers = FinalizerManager::new(self.store.as_ref());

        let resolved =
            match datasource::resolve(self.store.as_ref(), namespace, &vr.spec.data_source).await {
                Ok(resolved) => resolved,
                Err(err) if deleting && is_unaddressable(&err) => {
                    info!(error = %err, "Data source cannot be addressed, releasing without disabling");
                    let reference = vr.spec.data_source.clone();
                    if let Some(mut object) =
                        datasource::lookup(self.store.as_ref(), namespace, &reference).await?
                    {
                        finalizers.release_data_source(&mut object).await?;
                    }
                    finalizers.release_intent(&mut vr).await?;
                    return Ok(Action::await_change());
                }
                Err(err) => return self.fail(&mut vr, err).await,
            };
        debug!(
            kind = %resolved.object.kind(),
            source = %resolved.object.name(),
            handle = %resolved.volume_handle,
            "Resolved data source"
        );

        let request = ReplicationRequest {
            source: resolved.replication_source(),
            replication_id: vr.replication_handle().to_string(),
            parameters,
            secrets,
        };
        let session = self.session(request);
        let mut data_source = resolved.object;

        if deleting {
            return self
                .finalize(&mut vr, &mut data_source, &session, &finalizers)
                .await;
        }

        finalizers.protect_intent(&mut vr).await?;
        finalizers.protect_data_source(&mut data_source).await?;

        vr.status_mut().last_start_time = Some(Utc::now());
        self.write_status(&mut vr).await?;

        // Enable is idempotent on the driver and runs on every pass
        if let Err(err) = session.enable().await {
            return self.fail(&mut vr, err).await;
        }

        let desired = match vr.desired_state() {
            Ok(desired) => desired,
            Err(err) => return self.fail(&mut vr, err).await,
        };
        let prior = vr.current_state();

        match self.apply(&session, &mut vr, desired, prior).await {
            Ok(Applied::Complete) => self.complete(&mut vr, desired).await,
            Ok(Applied::Demoted) => {
                info!("Volume marked secondary, deferring resync");
                let status = vr.status_mut();
                status.state = StatusState::Secondary;
                status.message = Some(SECONDARY_DEGRADED_MESSAGE.to_string());
                self.write_status(&mut vr).await?;
                Ok(Action::requeue(SECONDARY_REQUEUE))
            }
            Ok(Applied::ResyncPending) => {
                info!("Volume is not ready to use, requeuing for resync");
                vr.status_mut().message = Some(DEGRADED_MESSAGE.to_string());
                self.write_status(&mut vr).await?;
                Ok(Action::requeue(RESYNC_REQUEUE))
            }
            Err(err) => {
                warn!(error = %err, state = %desired, "Failed to replicate");
                vr.status_mut().message = Some(err.status_message());
                if let Err(write_err) = self.write_status(&mut vr).await {
                    warn!(error = %write_err, "Failed to update VolumeReplication status");
                }
                if prior == StatusState::Secondary {
                    return Ok(Action::requeue(SECONDARY_REQUEUE));
                }
                Err(err)
            }
        }
    }

    /// Issue the driver operations for `desired`, recording conditions
    async fn apply(
        &self,
        session: &ReplicationSession<'_>,
        vr: &mut VolumeReplication,
        desired: ReplicationState,
        prior: StatusState,
    ) -> Result<Applied> {
        match desired {
            ReplicationState::Primary => {
                self.promote(session, vr).await?;
                Ok(Applied::Complete)
            }
            // The backend may need time to settle (e.g. split brain correction)
            // before the first resync of a freshly demoted volume
            ReplicationState::Secondary if prior != StatusState::Secondary => {
                self.demote(session, vr).await?;
                Ok(Applied::Demoted)
            }
            ReplicationState::Secondary => {
                self.demote(session, vr).await?;
                let force = vr.spec.auto_resync;
                self.resync(session, vr, force).await
            }
            ReplicationState::Resync => self.resync(session, vr, true).await,
        }
    }

    async fn promote(&self, session: &ReplicationSession<'_>, vr: &mut VolumeReplication) -> Result<()> {
        let generation = vr.generation();
        let result = session.promote().await;
        let conditions = &mut vr.status_mut().conditions;
        match &result {
            Ok(()) => set_promoted(conditions, generation),
            Err(_) => set_failed_promotion(conditions, generation),
        }
        result
    }

    async fn demote(&self, session: &ReplicationSession<'_>, vr: &mut VolumeReplication) -> Result<()> {
        let generation = vr.generation();
        let result = session.demote().await;
        let conditions = &mut vr.status_mut().conditions;
        match &result {
            Ok(()) => set_demoted(conditions, generation),
            Err(_) => set_failed_demotion(conditions, generation),
        }
        result
    }

    async fn resync(
        &self,
        session: &ReplicationSession<'_>,
        vr: &mut VolumeReplication,
        force: bool,
    ) -> Result<Applied> {
        let generation = vr.generation();
        let result = session.resync(force).await;
        let conditions = &mut vr.status_mut().conditions;
        match result {
            Ok(response) => {
                set_resynced(conditions, generation);
                if response.ready {
                    set_not_degraded(conditions, generation);
                    Ok(Applied::Complete)
                } else {
                    set_degraded(conditions, generation);
                    Ok(Applied::ResyncPending)
                }
            }
            Err(err) => {
                set_failed_resync(conditions, generation);
                Err(err)
            }
        }
    }

    /// Record the applied state once every operation succeeded
    async fn complete(&self, vr: &mut VolumeReplication, desired: ReplicationState) -> Result<Action> {
        let message = match desired {
            ReplicationState::Resync => RESYNCING_MESSAGE.to_string(),
            other => format!("volume is marked {}", other),
        };
        let generation = vr.generation();
        let status = vr.status_mut();
        status.state = desired.applied_state();
        status.message = Some(message.clone());
        status.observed_generation = Some(generation);
        status.last_completion_time = Some(Utc::now());
        self.write_status(vr).await?;

        info!(state = %desired, generation, "{}", message);
        Ok(Action::await_change())
    }

    /// Deletion: disable replication while the data source is still
    /// protected, then release the data source and finally the intent.
    ///
    /// Each step is keyed off the finalizer it clears, so a pass interrupted
    /// between steps resumes where it stopped.
    async fn finalize(
        &self,
        vr: &mut VolumeReplication,
        data_source: &mut DataSourceObject,
        session: &ReplicationSession<'_>,
        finalizers: &FinalizerManager<'_>,
    ) -> Result<Action> {
        if !has_finalizer(&vr.metadata, VOLUME_REPLICATION_FINALIZER) {
            debug!("VolumeReplication is terminating and already released");
            return Ok(Action::await_change());
        }

        if is_data_source_protected(data_source) {
            session.disable().await?;
            finalizers.release_data_source(data_source).await?;
        } else {
            debug!(source = %data_source.name(), "Data source already released, not disabling again");
        }
        finalizers.release_intent(vr).await?;

        info!("VolumeReplication terminated, replication disabled");
        Ok(Action::await_change())
    }

    /// Record a failure in status and hand the error back to the caller.
    ///
    /// `status.state` keeps the last durable role.
    async fn fail(&self, vr: &mut VolumeReplication, err: Error) -> Result<Action> {
        warn!(error = %err, "Reconcile failed");
        let desired = vr.desired_state().ok();
        let generation = vr.generation();
        let message = err.status_message();
        let status = vr.status_mut();
        set_failure(&mut status.conditions, desired, &message, generation);
        status.message = Some(message);
        if let Err(write_err) = self.write_status(vr).await {
            warn!(error = %write_err, "Failed to update VolumeReplication status");
        }
        Err(err)
    }

    async fn write_status(&self, vr: &mut VolumeReplication) -> Result<()> {
        *vr = self.store.update_volume_replication_status(vr).await?;
        Ok(())
    }

    async fn load_secrets(&self, class: &VolumeReplicationClass) -> Result<BTreeMap<String, String>> {
        let Some(reference) = secret_reference(&class.spec.parameters) else {
            return Ok(BTreeMap::new());
        };
        let secret = self
            .store
            .get_secret(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Secret".to_string(),
                name: format!("{}/{}", reference.namespace, reference.name),
            })?;
        Ok(secret_data(&secret))
    }

    fn session(&self, request: ReplicationRequest) -> ReplicationSession<'_> {
        let session = ReplicationSession::new(self.client.as_ref(), request);
        match &self.metrics {
            Some(metrics) => session.with_metrics(metrics),
            None => session,
        }
    }
}
