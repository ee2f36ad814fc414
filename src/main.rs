//! Node Device Manager
//!
//! Per-node daemon that keeps the cluster's BlockDevice inventory in step
//! with the block devices attached to this node.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   events    ┌──────────────────────────────────────┐
//! │  Device Watcher  │ ──────────► │             Event Loop               │
//! │ (sysfs + mounts) │             │  add / change / remove handlers      │
//! └──────────────────┘             └──────┬───────────────┬───────────────┘
//!          ▲                              │               │
//!          │ full scan                    ▼               ▼
//! ┌────────┴─────────┐         ┌────────────────┐  ┌─────────────────────┐
//! │    Controller    │ ◄────── │ Probe / Filter │  │  Hierarchy Cache    │
//! │ rescan, identity │         │   registries   │  │ (disk/part/holder)  │
//! └────────┬─────────┘         └────────────────┘  └─────────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ BlockDevice CRs  │  create / update / deactivate
//! └──────────────────┘
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Client, CustomResourceExt};

use node_device_manager::config::{FeatureGates, NodeDiskManagerConfig};
use node_device_manager::crd::BlockDevice;
use node_device_manager::filter::{FilterContext, FilterRegistry};
use node_device_manager::hardware::{
    DeviceWatcher, GptPartitioner, HostPaths, SparseFileConfig, SysfsScanner,
};
use node_device_manager::identity::IdentityResolver;
use node_device_manager::probe::{ProbeContext, ProbeRegistry};
use node_device_manager::reconciler::{Controller, ControllerParts, EventLoop};
use node_device_manager::store::{Inventory, KubeDeviceStore};
use node_device_manager::cli::list_devices;
use node_device_manager::{Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Node Device Manager - block device inventory for this node
#[derive(Parser, Debug)]
#[command(name = "ndm", author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the device manager daemon
    Start(StartArgs),

    /// Inspect block devices
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// List the BlockDevice resources
    List {
        #[arg(long, env = "NAMESPACE", default_value = "openebs")]
        namespace: String,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Name of the node this daemon runs on
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Namespace for BlockDevice resources
    #[arg(long, env = "NAMESPACE", default_value = "openebs")]
    namespace: String,

    /// Probe, filter and tag configuration file
    #[arg(long, env = "NDM_CONFIG", default_value = "/host/node-disk-manager.config")]
    config: PathBuf,

    /// Feature gates, as Name or Name=<bool>
    #[arg(long, env = "FEATURE_GATES", value_delimiter = ',', default_value = "GPTBasedUUID")]
    feature_gates: Vec<String>,

    /// Install the BlockDevice CRD at startup
    #[arg(long, env = "OPENEBS_IO_INSTALL_CRD", default_value_t = true, action = clap::ArgAction::Set)]
    install_crd: bool,

    /// Directory for sparse test devices; unset disables them
    #[arg(long, env = "SPARSE_FILE_DIR")]
    sparse_file_dir: Option<PathBuf>,

    /// Sparse file size in bytes
    #[arg(long, env = "SPARSE_FILE_SIZE")]
    sparse_file_size: Option<u64>,

    /// Number of sparse files
    #[arg(long, env = "SPARSE_FILE_COUNT")]
    sparse_file_count: Option<u32>,

    /// Host poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "5")]
    poll_interval_secs: u64,

    /// Full rescan interval in seconds, 0 disables
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value = "0")]
    resync_interval_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8585")]
    health_addr: String,

    #[arg(long, default_value = "/sys")]
    sysfs_path: PathBuf,

    #[arg(long, default_value = "/run/udev/data")]
    udev_data_path: PathBuf,

    #[arg(long, default_value = "/host/proc/1/mounts")]
    host_mounts_path: PathBuf,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli).context("unable to initialize logging")?;

    match cli.command {
        Command::Start(args) => start(args).await?,
        Command::Device {
            command: DeviceCommand::List { namespace },
        } => {
            let client = Client::try_default()
                .await
                .context("unable to create Kubernetes client")?;
            let store = KubeDeviceStore::new(client, namespace);
            print!("{}", list_devices(&store).await?);
        }
    }
    Ok(())
}

async fn start(args: StartArgs) -> Result<()> {
    info!("Starting Node Device Manager");
    info!("  Version: {}", node_device_manager::VERSION);
    info!("  Node: {}", args.node_name);
    info!("  Namespace: {}", args.namespace);
    info!("  Config: {}", args.config.display());

    let features = FeatureGates::parse(&args.feature_gates)?;
    let config = NodeDiskManagerConfig::load(&args.config);

    let client = connect().await?;
    info!("Connected to Kubernetes cluster");
    if args.install_crd {
        install_crd(client.clone()).await?;
    }

    let paths = HostPaths {
        sysfs: args.sysfs_path.clone(),
        udev_data: args.udev_data_path.clone(),
        host_mounts: args.host_mounts_path.clone(),
        ..Default::default()
    };
    let scanner = Arc::new(SysfsScanner::with_paths(paths));

    let probes = ProbeRegistry::from_context(&ProbeContext::new(scanner.clone(), config.clone()));
    let filters = FilterRegistry::from_context(&FilterContext::new(scanner.clone(), config));
    info!("Registered {} probes and {} filters", probes.len(), filters.len());

    let store = Arc::new(KubeDeviceStore::new(client, args.namespace.clone()));
    let (tx, rx) = mpsc::channel(1024);
    let controller = Controller::new(
        ControllerParts {
            inventory: Inventory::new(store, args.node_name.clone(), args.namespace.clone()),
            resolver: IdentityResolver::for_local_node(),
            probes: Arc::new(probes),
            filters: Arc::new(filters),
            source: scanner.clone(),
            partitioner: Arc::new(GptPartitioner::new()),
            features,
            sparse: SparseFileConfig::new(
                args.sparse_file_dir.clone(),
                args.sparse_file_size,
                args.sparse_file_count,
            ),
        },
        tx.clone(),
    );

    let ready = Arc::new(AtomicBool::new(false));
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    let cancel = CancellationToken::new();
    let event_loop = EventLoop::new(controller.clone(), rx)
        .with_resync(Duration::from_secs(args.resync_interval_secs));
    let loop_handle = tokio::spawn(event_loop.run(cancel.clone()));

    if let Err(e) = controller.init_sparse_files().await {
        warn!("unable to initialize sparse files: {}", e);
    }
    controller.rescan().await?;

    let watcher = DeviceWatcher::new(scanner, Duration::from_secs(args.poll_interval_secs.max(1)));
    let watcher_handle = tokio::spawn(watcher.run(tx, cancel.clone()));
    ready.store(true, Ordering::SeqCst);
    info!("Node Device Manager ready");

    shutdown_signal().await;
    info!("Shutdown signal received");
    cancel.cancel();

    for (name, handle) in [("event loop", loop_handle), ("watcher", watcher_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} stopped with error: {}", name, e),
            Err(e) => warn!("{} task failed: {}", name, e),
        }
    }

    controller.inventory().mark_unknown().await?;
    info!("Node Device Manager shutdown complete");
    Ok(())
}

// =============================================================================
// Cluster Setup
// =============================================================================

/// Create a client and probe the API server, backing off on failure
async fn connect() -> Result<Client> {
    let policy = backoff::ExponentialBackoff {
        max_elapsed_time: Some(Duration::from_secs(120)),
        ..Default::default()
    };
    backoff::future::retry(policy, || async {
        let client = Client::try_default().await.map_err(|e| {
            warn!("Kubernetes client not available: {}", e);
            backoff::Error::transient(e)
        })?;
        client.apiserver_version().await.map_err(|e| {
            warn!("API server not reachable: {}", e);
            backoff::Error::transient(e)
        })?;
        Ok::<_, backoff::Error<kube::Error>>(client)
    })
    .await
    .map_err(Error::Kube)
}

/// Server-side apply the BlockDevice CRD and wait until it is established
async fn install_crd(client: Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let crd = BlockDevice::crd();
    let name = crd
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::Internal("BlockDevice CRD has no name".into()))?;

    crds.patch(&name, &PatchParams::apply("node-device-manager").force(), &Patch::Apply(&crd))
        .await?;
    info!("Applied CRD {}", name);

    let established = await_condition(crds, &name, conditions::is_crd_established());
    tokio::time::timeout(Duration::from_secs(30), established)
        .await
        .map_err(|_| Error::Internal(format!("CRD {} not established in time", name)))?
        .map_err(|e| Error::Internal(format!("waiting for CRD {}: {}", name, e)))?;
    info!("CRD {} established", name);
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        let mut stream = signal(SignalKind::terminate())?;
        stream.recv().await;
        Ok::<(), std::io::Error>(())
    };
    tokio::select! {
        _ = wait_for_signal("SIGINT", tokio::signal::ctrl_c()) => {}
        _ = wait_for_signal("SIGTERM", terminate) => {}
    }
}

/// Resolves once the signal arrives; a listener that failed to install
/// never resolves, so it cannot trigger a shutdown
async fn wait_for_signal<F>(name: &str, signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("received {}, shutting down", name),
        Err(e) => {
            warn!("unable to listen for {}: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?);

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;
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
