//! VolumeReplication controller
//!
//! - [`reconciler`]: the replication state machine run for one intent
//! - [`datasource`]: resolves a claim or volume group to its driver handle
//! - [`finalizers`]: deletion protection of intents and data sources
//! - [`conditions`]: status condition projection
//! - [`parameters`]: class parameter validation and secret lookup
//! - [`kube_store`]: [`crate::domain::ports::ObjectStore`] over the API server
//! - [`runner`]: kube-runtime wiring and requeue policy
//! - [`startup`]: waits for the required CRDs

pub mod conditions;
pub mod datasource;
pub mod finalizers;
pub mod kube_store;
pub mod parameters;
pub mod reconciler;
pub mod runner;
pub mod startup;

#[cfg(test)]
pub(crate) mod testing;

pub use finalizers::{PVC_REPLICATION_FINALIZER, VG_REPLICATION_FINALIZER, VOLUME_REPLICATION_FINALIZER};
pub use kube_store::KubeStore;
pub use reconciler::Reconciler;
pub use runner::{run, Context};
pub use startup::wait_for_crds;
