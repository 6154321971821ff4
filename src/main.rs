//! Ingress controller control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!   snapshot file ──▶ store ──▶ SyncQueue ──▶ Reconciler ──▶ DataPlane
//!        ▲                                        │           (reload / backends)
//!        │ notify                                 ├──▶ RunningConfig ──▶ /status
//!   SnapshotWatcher                               └──▶ PassthroughRouter table
//!
//!   POST /validate ──▶ AdmissionBatcher ──▶ DeclarationValidator ──▶ render + check
//!
//!   TLS client ──▶ Listener ──▶ PassthroughRouter ──▶ service / local proxy
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ingress_control::admission::{admission_router, AdmissionBatcher, AdmissionState, DeclarationValidator};
use ingress_control::config::{load_config, ControllerConfig};
use ingress_control::dataplane::{renderer, DataPlane, HttpDataPlane};
use ingress_control::lifecycle::{wait_for_signal, Shutdown};
use ingress_control::model::SettingsParser;
use ingress_control::net::Listener;
use ingress_control::observability::{init_tracing, metrics};
use ingress_control::passthrough::PassthroughRouter;
use ingress_control::routing::{self, Candidates};
use ingress_control::store::{FileStore, ResourceStore, SnapshotWatcher};
use ingress_control::sync::{checksum, DynamicPublisher, Reconciler, SyncQueue};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "ingress-control")]
#[command(about = "Control plane for an HTTP/HTTPS ingress proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "ingress-control.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller (default)
    Run,
    /// Build the configuration once from the snapshot and print it
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.observability.log_level, config.observability.log_format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "ingress-control starting"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Check => check(&config),
    }
}

fn check(config: &ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(&config.store.snapshot_path)?;
    let options = config.synthesis_options();
    let declarations = routing::resolve_all(
        store.list_declarations(),
        &options.parser,
        options.strict_path_validation,
    );
    let mut built = routing::synthesize(&store, &options, &declarations, &Candidates::new())?;
    built.checksum = Some(checksum(&built)?);
    renderer::check_structure(&built)?;

    let rendered = renderer::render(&built)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&rendered)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

async fn run(config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let store = Arc::new(FileStore::open(&config.store.snapshot_path)?);
    let resources: Arc<dyn ResourceStore> = store.clone();
    let data_plane: Arc<dyn DataPlane> = Arc::new(HttpDataPlane::new(&config.data_plane)?);

    let shutdown = Shutdown::new();
    let queue = SyncQueue::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let publisher = DynamicPublisher::new(Arc::clone(&data_plane), config.backoff());
    let mut reconciler = Reconciler::new(
        Arc::clone(&resources),
        Arc::clone(&data_plane),
        publisher,
        config.reconciler_options(),
    );
    let running = reconciler.running();

    let passthrough = if config.controller.enable_ssl_passthrough {
        let router = Arc::new(PassthroughRouter::new(
            config.passthrough_default(),
            config.passthrough_options(),
        ));
        let listener = Listener::bind(
            &config.passthrough.bind_address,
            config.passthrough.max_connections,
        )
        .await?;
        tasks.push(tokio::spawn(Arc::clone(&router).serve(listener, shutdown.subscribe())));
        reconciler = reconciler.with_passthrough(Arc::clone(&router));
        Some(router)
    } else {
        None
    };

    let batcher = if config.admission.enabled {
        let validator = Arc::new(DeclarationValidator::new(
            Arc::clone(&resources),
            Arc::clone(&data_plane),
            config.synthesis_options(),
        ));
        let batcher = Arc::new(AdmissionBatcher::new(validator, config.batcher_options()));
        batcher.start();

        let state = AdmissionState {
            batcher: Arc::clone(&batcher),
            running: running.clone(),
            parser: SettingsParser::new(config.controller.annotation_prefix.clone()),
            strict_path_validation: config.controller.strict_path_validation,
        };
        let listener = TcpListener::bind(&config.admission.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admission webhook listening");

        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, admission_router(state))
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admission webhook failed");
            }
        }));
        Some(batcher)
    } else {
        None
    };

    // Dropping the watcher stops file events, so keep it for the whole run.
    let _watcher = if config.store.watch {
        match SnapshotWatcher::new(Arc::clone(&store), queue.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot watcher unavailable, relying on periodic resync");
                None
            }
        }
    } else {
        None
    };

    queue.enqueue("startup");
    let reconciler_task = tokio::spawn(reconciler.run(queue.clone(), shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();

    if let Some(batcher) = &batcher {
        batcher.stop().await;
    }
    let _ = reconciler_task.await;
    for task in tasks {
        let _ = task.await;
    }
    if let Some(router) = passthrough {
        if !router.tracker().drain(DRAIN_TIMEOUT).await {
            tracing::warn!(
                remaining = router.tracker().active_count(),
                "Passthrough connections still open after drain timeout"
            );
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
