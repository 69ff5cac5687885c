//! Cloud Delegator
//!
//! Reconciles regional cloud resources (block storage, workspaces) against a
//! CSP provider plugin. Runs as a Kubernetes operator watching the custom
//! resources, or standalone against an in-memory store seeded from a
//! manifest file.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloud_delegator::controller::{cancel_on_signal, KubeDriver, ObjectStores, PollingDriver};
use cloud_delegator::{
    crd, Context, ControllerMetrics, ControllerSet, Error, KubeObjectStore, Manifest,
    MemoryObjectStore, OperatorConfig, PluginSet, ProviderFactory, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cloud Delegator - reconciliation engine for sovereign cloud resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, env = "DELEGATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// CSP provider, overrides the configuration file
    #[arg(long, env = "PROVIDER")]
    provider: Option<String>,

    /// Requeue delay in seconds, overrides the configuration file
    #[arg(long, env = "REQUEUE_AFTER")]
    requeue_after_secs: Option<u64>,

    /// Only watch this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Manifest seeding the in-memory store in standalone mode
    #[arg(long, env = "MANIFEST", requires = "standalone")]
    manifest: Option<PathBuf>,

    /// Print the custom resource definitions and exit
    #[arg(long)]
    crd: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.crd {
        print!("{}", crd::render_definitions()?);
        return Ok(());
    }

    init_logging(&args)?;
    let config = load_config(&args)?;

    info!("Starting Cloud Delegator");
    info!("  Version: {}", cloud_delegator::VERSION);
    info!("  Provider: {}", config.provider.name);
    info!("  Requeue after: {:?}", config.requeue_after());
    info!("  Standalone mode: {}", args.standalone);

    let metrics = ControllerMetrics::register(prometheus::default_registry())?;
    let plugins = ProviderFactory::create(&config.provider)?;

    let root = Context::new();
    cancel_on_signal(root.token().clone());

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    if args.standalone {
        let block_storage = Arc::new(MemoryObjectStore::<crd::BlockStorage>::new());
        let workspace = Arc::new(MemoryObjectStore::<crd::Workspace>::new());
        let stores = ObjectStores {
            block_storage,
            workspace,
        };
        let controllers =
            ControllerSet::build(stores, plugins, config.requeue_after(), Some(metrics));

        if let Some(path) = &args.manifest {
            let manifest = Manifest::load(path)?;
            controllers.seed(&root, &manifest).await?;
        }

        run_standalone(&controllers, &config, &root).await?;
    } else {
        let client = kube::Client::try_default().await?;
        info!("Connected to Kubernetes API server");
        let controllers = cluster_controllers(client.clone(), &config, plugins, metrics);
        run_kubernetes(client, &controllers, &config, &root).await;
    }

    info!("Delegator shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<OperatorConfig> {
    let mut config = match &args.config {
        Some(path) => OperatorConfig::load(path)?,
        None => OperatorConfig::default(),
    };

    if let Some(provider) = &args.provider {
        config.provider.name = provider.clone();
    }
    if let Some(secs) = args.requeue_after_secs {
        config.requeue_after_secs = secs;
    }
    if args.namespace.is_some() {
        config.namespace = args.namespace.clone();
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Drivers
// =============================================================================

fn cluster_controllers(
    client: kube::Client,
    config: &OperatorConfig,
    plugins: PluginSet,
    metrics: ControllerMetrics,
) -> ControllerSet {
    let stores = ObjectStores {
        block_storage: Arc::new(
            KubeObjectStore::<crd::BlockStorage>::new(client.clone())
                .with_namespace(config.namespace.clone()),
        ),
        workspace: Arc::new(
            KubeObjectStore::<crd::Workspace>::new(client)
                .with_namespace(config.namespace.clone()),
        ),
    };

    ControllerSet::build(stores, plugins, config.requeue_after(), Some(metrics))
}

async fn run_kubernetes(
    client: kube::Client,
    controllers: &ControllerSet,
    config: &OperatorConfig,
    root: &Context,
) {
    let (block_storage_api, workspace_api) = match &config.namespace {
        Some(ns) => (
            kube::Api::<crd::BlockStorage>::namespaced(client.clone(), ns),
            kube::Api::<crd::Workspace>::namespaced(client, ns),
        ),
        None => (
            kube::Api::<crd::BlockStorage>::all(client.clone()),
            kube::Api::<crd::Workspace>::all(client),
        ),
    };

    let block_storage = Arc::new(
        KubeDriver::new(controllers.block_storage.clone(), root.clone())
            .with_reconcile_timeout(config.reconcile_timeout()),
    );
    let workspace = Arc::new(
        KubeDriver::new(controllers.workspace.clone(), root.clone())
            .with_reconcile_timeout(config.reconcile_timeout()),
    );

    tokio::join!(block_storage.run(block_storage_api), workspace.run(workspace_api));
}

async fn run_standalone(
    controllers: &ControllerSet,
    config: &OperatorConfig,
    root: &Context,
) -> Result<()> {
    let block_storage = PollingDriver::new(controllers.block_storage.clone(), config.poll_interval())
        .with_reconcile_timeout(config.reconcile_timeout());
    let workspace = PollingDriver::new(controllers.workspace.clone(), config.poll_interval())
        .with_reconcile_timeout(config.reconcile_timeout());

    let (block_storage, workspace) = tokio::join!(block_storage.run(root), workspace.run(root));
    block_storage?;
    workspace?;
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

    let directive = |raw: &str| {
        raw.parse::<Directive>()
            .map_err(|e| Error::Configuration(format!("invalid log directive '{}': {}", raw, e)))
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?);

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

fn plain(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => plain(StatusCode::OK, "ok"),
                _ => plain(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Health server bind error: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static("text/plain; version=0.0.4"),
                            );
                            response
                        }
                        Err(e) => {
                            error!("Cannot encode metrics: {}", e);
                            plain(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                        }
                    }
                }
                _ => plain(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
