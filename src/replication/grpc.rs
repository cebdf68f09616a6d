//! gRPC Replication Client
//!
//! Talks to the replication driver sidecar over a unix domain socket or TCP.
//! Each call is bounded by the configured RPC timeout; no call is retried
//! here.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use tokio::net::UnixStream;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info, warn};

use super::proto;
use crate::config::DriverConfig;
use crate::domain::ports::{ReplicationClient, ReplicationRequest, ResyncResponse};
use crate::error::{DriverError, Error, Result};

/// Longest time spent waiting for the driver to answer its first probe
const PROBE_MAX_ELAPSED: Duration = Duration::from_secs(120);

/// Replication driver client over gRPC
#[derive(Clone)]
pub struct GrpcReplicationClient {
    inner: Grpc<Channel>,
    timeout: Duration,
}

impl GrpcReplicationClient {
    /// Build a client for the driver endpoint named in the configuration.
    ///
    /// The channel connects lazily: nothing is dialled until the first call,
    /// so a driver that is not up yet surfaces as a transport error from
    /// that call rather than from here.
    pub fn connect(config: &DriverConfig) -> Result<Self> {
        let channel = connect_channel(&config.driver_endpoint)?;
        info!(endpoint = %config.driver_endpoint, "Created replication driver channel");

        Ok(Self {
            inner: Grpc::new(channel),
            timeout: config.rpc_timeout,
        })
    }

    /// Probe the driver identity service until it answers.
    ///
    /// The sidecar is often started alongside the operator, so a refused
    /// connection is retried with exponential backoff for a bounded time.
    pub async fn wait_for_driver(&self) -> Result<()> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(PROBE_MAX_ELAPSED),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            self.probe().await.map_err(|e| {
                warn!(error = %e, "Replication driver probe failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| Error::DriverConnection(format!("driver probe failed: {}", e)))
    }

    /// Single identity probe
    pub async fn probe(&self) -> std::result::Result<(), DriverError> {
        let _: proto::ProbeResponse = self
            .unary(proto::IDENTITY_PROBE, proto::ProbeRequest {})
            .await?;
        Ok(())
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
    ) -> std::result::Result<Resp, DriverError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.inner.clone();
        let call = async move {
            grpc.ready()
                .await
                .map_err(|e| DriverError::Transport(format!("service was not ready: {}", e)))?;
            let codec: ProstCodec<Req, Resp> = ProstCodec::default();
            let response = grpc
                .unary(
                    tonic::Request::new(request),
                    PathAndQuery::from_static(path),
                    codec,
                )
                .await
                .map_err(classify_status)?;
            Ok(response.into_inner())
        };

        debug!(method = path, "Calling replication driver");
        with_timeout(self.timeout, call).await
    }
}

#[async_trait]
impl ReplicationClient for GrpcReplicationClient {
    async fn enable_volume_replication(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        let req = proto::EnableVolumeReplicationRequest {
            volume_id: String::new(),
            parameters: to_wire(&request.parameters),
            secrets: to_wire(&request.secrets),
            replication_id: request.replication_id.clone(),
            replication_source: Some((&request.source).into()),
        };
        let _: proto::EnableVolumeReplicationResponse =
            self.unary(proto::ENABLE_VOLUME_REPLICATION, req).await?;
        Ok(())
    }

    async fn disable_volume_replication(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        let req = proto::DisableVolumeReplicationRequest {
            volume_id: String::new(),
            parameters: to_wire(&request.parameters),
            secrets: to_wire(&request.secrets),
            replication_id: request.replication_id.clone(),
            replication_source: Some((&request.source).into()),
        };
        let _: proto::DisableVolumeReplicationResponse =
            self.unary(proto::DISABLE_VOLUME_REPLICATION, req).await?;
        Ok(())
    }

    async fn promote_volume(
        &self,
        request: &ReplicationRequest,
        force: bool,
    ) -> std::result::Result<(), DriverError> {
        let req = proto::PromoteVolumeRequest {
            volume_id: String::new(),
            force,
            parameters: to_wire(&request.parameters),
            secrets: to_wire(&request.secrets),
            replication_id: request.replication_id.clone(),
            replication_source: Some((&request.source).into()),
        };
        let _: proto::PromoteVolumeResponse = self.unary(proto::PROMOTE_VOLUME, req).await?;
        Ok(())
    }

    async fn demote_volume(
        &self,
        request: &ReplicationRequest,
    ) -> std::result::Result<(), DriverError> {
        let req = proto::DemoteVolumeRequest {
            volume_id: String::new(),
            force: false,
            parameters: to_wire(&request.parameters),
            secrets: to_wire(&request.secrets),
            replication_id: request.replication_id.clone(),
            replication_source: Some((&request.source).into()),
        };
        let _: proto::DemoteVolumeResponse = self.unary(proto::DEMOTE_VOLUME, req).await?;
        Ok(())
    }

    async fn resync_volume(
        &self,
        request: &ReplicationRequest,
        force: bool,
    ) -> std::result::Result<ResyncResponse, DriverError> {
        let req = proto::ResyncVolumeRequest {
            volume_id: String::new(),
            force,
            parameters: to_wire(&request.parameters),
            secrets: to_wire(&request.secrets),
            replication_id: request.replication_id.clone(),
            replication_source: Some((&request.source).into()),
        };
        let resp: proto::ResyncVolumeResponse = self.unary(proto::RESYNC_VOLUME, req).await?;
        Ok(ResyncResponse { ready: resp.ready })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Lazily connecting channel to `unix:///path` or `http(s)://host:port`
fn connect_channel(endpoint: &str) -> Result<Channel> {
    if let Some(path) = endpoint.strip_prefix("unix://") {
        let path = path.to_string();
        // The URI is ignored by the connector; tonic only needs a valid one.
        let channel = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| Error::Configuration(format!("invalid driver endpoint: {}", e)))?
            .connect_with_connector_lazy(service_fn(move |_: Uri| {
                UnixStream::connect(path.clone())
            }));
        return Ok(channel);
    }

    let channel = Endpoint::from_shared(endpoint.to_string())
        .map_err(|e| Error::Configuration(format!("invalid driver endpoint {}: {}", endpoint, e)))?
        .connect_lazy();
    Ok(channel)
}

/// Separate statuses sent by the driver from ones tonic builds locally.
///
/// A locally built status wraps the channel error as its source; a status
/// decoded from the driver's response has none.
fn classify_status(status: tonic::Status) -> DriverError {
    match std::error::Error::source(&status) {
        Some(source) => DriverError::Transport(format!("{}: {}", status.message(), source)),
        None => DriverError::Status(status),
    }
}

/// Run a driver call under the RPC timeout
async fn with_timeout<T, F>(timeout: Duration, call: F) -> std::result::Result<T, DriverError>
where
    F: Future<Output = std::result::Result<T, DriverError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(timeout)),
    }
}

fn to_wire(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
