//! Volume Replication Operator
//!
//! Reconciles VolumeReplication objects against a replication driver
//! sidecar reachable over gRPC.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_replication_operator::controller::{self, wait_for_crds};
use volume_replication_operator::crd::owned_crds_yaml;
use volume_replication_operator::{
    Context, DriverConfig, Error, GrpcReplicationClient, KubeStore, Metrics, OperatorConfig,
    Reconciler, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Replication Operator - drives storage replication through a CSI-Addons driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the replication driver served by this instance
    #[arg(long, env = "DRIVER_NAME", required_unless_present = "print_crds")]
    driver_name: Option<String>,

    /// Replication driver endpoint
    #[arg(long, env = "DRIVER_ENDPOINT", default_value = "unix:///csi/csi-addons.sock")]
    driver_endpoint: String,

    /// Timeout of each driver call in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value = "60")]
    rpc_timeout_secs: u64,

    /// Maximum number of reconciles running at once
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value = "10")]
    max_concurrent_reconciles: u16,

    /// Interval between CRD availability checks at startup, in seconds
    #[arg(long, env = "CRD_POLL_INTERVAL_SECS", default_value = "5")]
    crd_poll_interval_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the owned CRDs as YAML and exit
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            driver: DriverConfig {
                driver_name: self.driver_name.clone().unwrap_or_default(),
                driver_endpoint: self.driver_endpoint.clone(),
                rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
            },
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            crd_poll_interval: Duration::from_secs(self.crd_poll_interval_secs),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", owned_crds_yaml()?);
        return Ok(());
    }

    init_logging(&args)?;

    let config = args.operator_config();
    config.validate()?;

    info!("Starting Volume Replication Operator");
    info!("  Version: {}", volume_replication_operator::VERSION);
    info!("  Driver: {}", config.driver.driver_name);
    info!("  Endpoint: {}", config.driver.driver_endpoint);
    info!("  Max concurrent reconciles: {}", config.max_concurrent_reconciles);

    let metrics = Metrics::new()?;
    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let served_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, served_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone()));

    wait_for_crds(store.as_ref(), config.crd_poll_interval).await?;

    let driver = GrpcReplicationClient::connect(&config.driver)?;
    driver.wait_for_driver().await?;
    info!("Replication driver is reachable");

    let reconciler = Reconciler::new(store, Arc::new(driver), Arc::new(config.driver.clone()))
        .with_metrics(metrics.clone());
    let ctx = Arc::new(Context::new(reconciler, metrics));

    ready.store(true, Ordering::SeqCst);
    controller::run(client, ctx, config.max_concurrent_reconciles).await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "h2=warn"] {
        let directive = directive
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid log directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let (status, body) = match req.uri().path() {
                        "/healthz" | "/livez" => (StatusCode::OK, "ok"),
                        "/readyz" if ready => (StatusCode::OK, "ok"),
                        "/readyz" => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => (StatusCode::NOT_FOUND, "not found"),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Metrics) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((format, buffer)) => {
                                if let Ok(value) = format.parse() {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                *response.body_mut() = Body::from(buffer);
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            }
                        },
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
