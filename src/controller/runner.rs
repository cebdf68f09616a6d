//! Controller wiring
//!
//! Feeds VolumeReplication changes into the [`Reconciler`] through the
//! kube-runtime controller. Intents are filtered on generation so status
//! writes do not retrigger them; claims and volume groups are watched and
//! mapped back to the intents that reference them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{predicates, watcher, Controller, WatchStreamExt};
use kube::{Client, ResourceExt};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::controller::datasource::{referencing_intents, DataSourceKind};
use crate::controller::reconciler::Reconciler;
use crate::crd::{VolumeGroup, VolumeReplication};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::Metrics;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Shared state handed to every reconcile
pub struct Context {
    pub reconciler: Reconciler,
    pub metrics: Metrics,
    // Per-object retry delays, dropped on the next success
    backoffs: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl Context {
    pub fn new(reconciler: Reconciler, metrics: Metrics) -> Self {
        Self {
            reconciler,
            metrics,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    fn next_backoff(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock();
        let backoff = backoffs.entry(key.to_string()).or_insert_with(|| {
            ExponentialBackoffBuilder::new()
                .with_initial_interval(BACKOFF_INITIAL)
                .with_randomization_factor(0.0)
                .with_multiplier(2.0)
                .with_max_interval(BACKOFF_MAX)
                .with_max_elapsed_time(None)
                .build()
        });
        backoff.next_backoff().unwrap_or(BACKOFF_MAX)
    }

    fn reset_backoff(&self, key: &str) {
        self.backoffs.lock().remove(key);
    }
}

fn object_key(vr: &VolumeReplication) -> String {
    format!("{}/{}", vr.namespace().unwrap_or_default(), vr.name_any())
}

/// Reconcile entry point for the controller
pub async fn reconcile(vr: Arc<VolumeReplication>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = vr.namespace().unwrap_or_default();
    let name = vr.name_any();

    let result = ctx.reconciler.reconcile(&namespace, &name).await;
    match &result {
        Ok(action) => {
            ctx.metrics.observe_reconcile("success");
            ctx.reset_backoff(&object_key(&vr));
            debug!(%namespace, %name, ?action, "Reconcile finished");
        }
        Err(_) => ctx.metrics.observe_reconcile("error"),
    }
    result
}

/// Requeue policy for failed reconciles
pub fn error_policy(vr: Arc<VolumeReplication>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = object_key(&vr);
    match error.action() {
        ErrorAction::NoRequeue => {
            warn!(object = %key, %error, "Reconcile failed, waiting for the object to change");
            Action::await_change()
        }
        ErrorAction::RequeueAfter(delay) => {
            warn!(object = %key, %error, ?delay, "Reconcile failed");
            Action::requeue(delay)
        }
        ErrorAction::RequeueWithBackoff => {
            let delay = ctx.next_backoff(&key);
            warn!(object = %key, %error, ?delay, "Reconcile failed, retrying with backoff");
            Action::requeue(delay)
        }
    }
}

/// Intents in the reflector store that reference the named data source
pub fn intents_for(
    store: &Store<VolumeReplication>,
    kind: DataSourceKind,
    namespace: &str,
    name: &str,
) -> Vec<ObjectRef<VolumeReplication>> {
    let intents = store.state();
    referencing_intents(intents.iter().map(|vr| &**vr), kind, namespace, name)
        .map(ObjectRef::from_obj)
        .collect()
}

/// Run the controller until a shutdown signal arrives
pub async fn run(client: Client, ctx: Arc<Context>, concurrency: u16) {
    let intents: Api<VolumeReplication> = Api::all(client.clone());
    let claims: Api<PersistentVolumeClaim> = Api::all(client.clone());
    let groups: Api<VolumeGroup> = Api::all(client);

    let (reader, writer) = reflector::store();
    let stream = watcher(intents, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    let claim_index = reader.clone();
    let group_index = reader.clone();

    info!(concurrency, "Starting VolumeReplication controller");
    Controller::for_stream(stream, reader)
        .with_config(controller::Config::default().concurrency(concurrency))
        .watches(claims, watcher::Config::default(), move |pvc: PersistentVolumeClaim| {
            let namespace = pvc.namespace().unwrap_or_default();
            intents_for(
                &claim_index,
                DataSourceKind::SingleVolume,
                &namespace,
                &pvc.name_any(),
            )
        })
        .watches(groups, watcher::Config::default(), move |vg: VolumeGroup| {
            let namespace = vg.namespace().unwrap_or_default();
            intents_for(
                &group_index,
                DataSourceKind::VolumeGroup,
                &namespace,
                &vg.name_any(),
            )
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object, "Reconciled"),
                Err(e) => error!(error = %e, "Reconcile error"),
            }
        })
        .await;
    info!("VolumeReplication controller stopped");
}
