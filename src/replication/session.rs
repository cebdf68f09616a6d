//! Replication Session
//!
//! A session binds the driver client to one replication relationship
//! (source, handle, parameters, secrets) for the duration of a reconcile and
//! issues the five driver operations against it.

use std::time::Instant;

use tonic::Code;
use tracing::{debug, info};

use crate::domain::ports::{
    ReplicationClient, ReplicationOperation, ReplicationRequest, ResyncResponse,
};
use crate::error::{DriverError, Error, Result};
use crate::metrics::Metrics;

/// Codes on which a promotion is retried with the force flag
pub const PROMOTION_KNOWN_ERRORS: &[Code] = &[Code::FailedPrecondition];

/// Codes on which disabling replication counts as already done
pub const DISABLE_KNOWN_ERRORS: &[Code] = &[Code::NotFound];

/// Driver operations for a single replication relationship
pub struct ReplicationSession<'a> {
    client: &'a dyn ReplicationClient,
    request: ReplicationRequest,
    metrics: Option<&'a Metrics>,
}

impl<'a> ReplicationSession<'a> {
    /// Create a session for the given request
    pub fn new(client: &'a dyn ReplicationClient, request: ReplicationRequest) -> Self {
        Self {
            client,
            request,
            metrics: None,
        }
    }

    /// Record operation outcomes and durations
    pub fn with_metrics(mut self, metrics: &'a Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enable replication
    pub async fn enable(&self) -> Result<()> {
        let started = Instant::now();
        let result = self.client.enable_volume_replication(&self.request).await;
        self.finish(ReplicationOperation::Enable, started, result)
    }

    /// Disable replication; a relationship the driver no longer knows is
    /// treated as already disabled
    pub async fn disable(&self) -> Result<()> {
        let started = Instant::now();
        match self.client.disable_volume_replication(&self.request).await {
            Err(e) if e.has_known_error(DISABLE_KNOWN_ERRORS) => {
                info!(
                    source = %self.request.source,
                    "Replication target not found on driver, treating as disabled"
                );
                self.observe(ReplicationOperation::Disable, started, "known_error");
                Ok(())
            }
            result => self.finish(ReplicationOperation::Disable, started, result),
        }
    }

    /// Promote the volume, escalating to a forced promotion when the driver
    /// reports a known precondition failure
    pub async fn promote(&self) -> Result<()> {
        let started = Instant::now();
        match self.client.promote_volume(&self.request, false).await {
            Err(e) if e.has_known_error(PROMOTION_KNOWN_ERRORS) => {
                info!(
                    source = %self.request.source,
                    error = %e,
                    "Force promoting volume due to known driver error"
                );
                self.observe(ReplicationOperation::Promote, started, "known_error");

                let started = Instant::now();
                let result = self.client.promote_volume(&self.request, true).await;
                self.finish(ReplicationOperation::Promote, started, result)
            }
            result => self.finish(ReplicationOperation::Promote, started, result),
        }
    }

    /// Demote the volume
    pub async fn demote(&self) -> Result<()> {
        let started = Instant::now();
        let result = self.client.demote_volume(&self.request).await;
        self.finish(ReplicationOperation::Demote, started, result)
    }

    /// Resync the volume
    pub async fn resync(&self, force: bool) -> Result<ResyncResponse> {
        let started = Instant::now();
        let result = self.client.resync_volume(&self.request, force).await;
        self.finish(ReplicationOperation::Resync, started, result)
    }

    fn finish<T>(
        &self,
        operation: ReplicationOperation,
        started: Instant,
        result: std::result::Result<T, DriverError>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                debug!(%operation, source = %self.request.source, "Driver operation succeeded");
                self.observe(operation, started, "success");
                Ok(value)
            }
            Err(source) => {
                self.observe(operation, started, "error");
                Err(Error::Replication { operation, source })
            }
        }
    }

    fn observe(&self, operation: ReplicationOperation, started: Instant, outcome: &str) {
        if let Some(metrics) = self.metrics {
            metrics.observe_driver_operation(operation, outcome, started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{DriverCall, FakeReplicationClient};
    use crate::domain::ports::ReplicationSource;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn request() -> ReplicationRequest {
        ReplicationRequest {
            source: ReplicationSource::Volume {
                volume_id: "vol-1".into(),
            },
            replication_id: String::new(),
            parameters: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_promote_forces_once_on_failed_precondition() {
        let client = FakeReplicationClient::new();
        client.push_error(
            ReplicationOperation::Promote,
            tonic::Status::failed_precondition("split brain"),
        );

        let session = ReplicationSession::new(&client, request());
        session.promote().await.unwrap();

        assert_eq!(
            client.calls(),
            vec![
                DriverCall::Promote { force: false },
                DriverCall::Promote { force: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_promote_other_error_is_not_forced() {
        let client = FakeReplicationClient::new();
        client.push_error(
            ReplicationOperation::Promote,
            tonic::Status::internal("backend down"),
        );

        let session = ReplicationSession::new(&client, request());
        let err = session.promote().await.unwrap_err();

        assert_matches!(
            err,
            Error::Replication {
                operation: ReplicationOperation::Promote,
                ..
            }
        );
        assert_eq!(client.calls(), vec![DriverCall::Promote { force: false }]);
    }

    #[tokio::test]
    async fn test_disable_not_found_is_success() {
        let client = FakeReplicationClient::new();
        client.push_error(
            ReplicationOperation::Disable,
            tonic::Status::not_found("no such image"),
        );

        let session = ReplicationSession::new(&client, request());
        assert!(session.disable().await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_failure_is_never_known() {
        let client = FakeReplicationClient::new();
        client.push_driver_error(
            ReplicationOperation::Disable,
            DriverError::Transport("connection refused".into()),
        );

        let session = ReplicationSession::new(&client, request());
        assert!(session.disable().await.is_err());
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        let client = FakeReplicationClient::new();
        let metrics = Metrics::new().unwrap();
        client.push_error(
            ReplicationOperation::Demote,
            tonic::Status::unavailable("retry later"),
        );

        let session = ReplicationSession::new(&client, request()).with_metrics(&metrics);
        session.enable().await.unwrap();
        assert!(session.demote().await.is_err());

        assert_eq!(metrics.driver_operation_count("enable", "success"), 1);
        assert_eq!(metrics.driver_operation_count("demote", "error"), 1);
    }
}
