//! Replication driver integration
//!
//! - [`proto`]: wire messages of the driver protocol
//! - [`grpc`]: tonic client implementing [`crate::domain::ports::ReplicationClient`]
//! - [`session`]: per-reconcile operations with known-error handling

pub mod grpc;
pub mod proto;
pub mod session;

pub use grpc::GrpcReplicationClient;
pub use session::{ReplicationSession, DISABLE_KNOWN_ERRORS, PROMOTION_KNOWN_ERRORS};
