//! Operator metrics
//!
//! Prometheus collectors for reconcile outcomes and driver operations,
//! registered on a registry owned by the operator and exposed by the
//! metrics server.

use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::domain::ports::ReplicationOperation;
use crate::error::{Error, Result};

/// Collectors for the replication controller
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    driver_operations_total: IntCounterVec,
    driver_operation_duration: HistogramVec,
}

impl Metrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("vr_reconcile_total", "Reconciles of VolumeReplication objects"),
            &["result"],
        )
        .map_err(metrics_error)?;

        let driver_operations_total = IntCounterVec::new(
            Opts::new(
                "vr_driver_operations_total",
                "Replication driver operations by outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let driver_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "vr_driver_operation_duration_seconds",
                "Duration of replication driver operations",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconcile_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(driver_operations_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(driver_operation_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconcile_total,
            driver_operations_total,
            driver_operation_duration,
        })
    }

    /// Count a finished reconcile
    pub fn observe_reconcile(&self, result: &str) {
        self.reconcile_total.with_label_values(&[result]).inc();
    }

    /// Count a driver operation and record its duration
    pub fn observe_driver_operation(
        &self,
        operation: ReplicationOperation,
        outcome: &str,
        elapsed: Duration,
    ) {
        self.driver_operations_total
            .with_label_values(&[operation.as_str(), outcome])
            .inc();
        self.driver_operation_duration
            .with_label_values(&[operation.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Current value of the driver operation counter
    pub fn driver_operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.driver_operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Current value of the reconcile counter
    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[result]).get()
    }

    /// Render all collectors in the text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
