//! Volume Replication Operator
//!
//! A Kubernetes operator that drives storage-level replication of
//! persistent volume claims and volume groups through a replication
//! driver sidecar.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    VolumeReplication Controller                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────┐  │
//! │  │  Data Source   │  │   Finalizer    │  │  Status/Condition  │  │
//! │  │   Resolver     │  │    Manager     │  │     Projector      │  │
//! │  └───────┬────────┘  └───────┬────────┘  └─────────┬──────────┘  │
//! │          └───────────────────┼─────────────────────┘             │
//! │                  ┌───────────┴───────────┐                       │
//! │                  │  Replication State    │                       │
//! │                  │       Machine         │                       │
//! │                  └───────────┬───────────┘                       │
//! ├──────────────────────────────┼───────────────────────────────────┤
//! │                  ┌───────────┴───────────┐                       │
//! │                  │  Replication Session  │                       │
//! │                  │   (gRPC to driver)    │                       │
//! │                  └───────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Reconciler, finalizers, data sources and conditions
//! - [`replication`]: Driver client and replication session
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and port traits
//! - [`config`]: Operator configuration
//! - [`metrics`]: Prometheus collectors
//! - [`error`]: Error types and handling

pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod replication;

// Re-export commonly used types
pub use config::{DriverConfig, OperatorConfig};

pub use controller::{Context, KubeStore, Reconciler};

pub use crd::{
    ReplicationState, VolumeGroup, VolumeGroupContent, VolumeReplication, VolumeReplicationClass,
    VolumeReplicationSpec, VolumeReplicationStatus,
};

pub use domain::ports::{
    ObjectStore, ReplicationClient, ReplicationOperation, ReplicationRequest, ReplicationSource,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use replication::{GrpcReplicationClient, ReplicationSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
