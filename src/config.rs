//! Operator configuration
//!
//! Built once at startup from the command line and shared read-only with
//! every reconcile.

use std::time::Duration;

use crate::error::{Error, Result};

/// Replication driver this operator instance is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Driver name; classes with a different provisioner are ignored
    pub driver_name: String,
    /// Driver endpoint, `unix:///path` or `http(s)://host:port`
    pub driver_endpoint: String,
    /// Timeout applied to every driver call
    pub rpc_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: String::new(),
            driver_endpoint: "unix:///csi/csi-addons.sock".to_string(),
            rpc_timeout: Duration::from_secs(60),
        }
    }
}

impl DriverConfig {
    /// Check the configuration for obvious mistakes
    pub fn validate(&self) -> Result<()> {
        if self.driver_name.trim().is_empty() {
            return Err(Error::Configuration("driver name must not be empty".into()));
        }
        let scheme_ok = ["unix://", "http://", "https://"]
            .iter()
            .any(|p| self.driver_endpoint.starts_with(p));
        if !scheme_ok {
            return Err(Error::Configuration(format!(
                "driver endpoint {} must use unix://, http:// or https://",
                self.driver_endpoint
            )));
        }
        if self.rpc_timeout.is_zero() {
            return Err(Error::Configuration("rpc timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration of the controller process
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Driver binding
    pub driver: DriverConfig,
    /// Upper bound on reconciles running at once
    pub max_concurrent_reconciles: u16,
    /// Interval between checks for the required CRDs at startup
    pub crd_poll_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            max_concurrent_reconciles: 10,
            crd_poll_interval: Duration::from_secs(5),
        }
    }
}

impl OperatorConfig {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.driver.validate()?;
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::Configuration(
                "max concurrent reconciles must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
