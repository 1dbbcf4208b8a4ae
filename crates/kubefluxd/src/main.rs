//! kubefluxd — the kube-flux daemon.
//!
//! Single binary that assembles the autoscaler:
//! - Policy store (optionally persisted in redb)
//! - Cluster provider and metrics source (Kubernetes or static)
//! - Control loop
//! - HTTP control surface
//!
//! # Usage
//!
//! ```text
//! kubefluxd run --config /etc/kubeflux/kubeflux.toml --port 8888
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kubeflux_api::{ApiState, build_router};
use kubeflux_autoscale::{ControlLoop, Reconciler, ReplicaController};
use kubeflux_cluster::{ClusterProvider, KubeClient, MetricsSource, StaticCluster};
use kubeflux_metrics::UsageAggregator;
use kubeflux_state::{PolicyDb, PolicyStore};

use crate::config::{KubefluxConfig, ProviderKind};

const DEFAULT_LOG_FILTER: &str = "info,kubefluxd=debug,kubeflux=debug";

#[derive(Parser)]
#[command(name = "kubefluxd", about = "Tiered replica autoscaler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop and the HTTP API.
    Run {
        /// Path to kubeflux.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Control loop interval in seconds.
        #[arg(long)]
        interval: Option<u64>,

        /// Data directory for the persisted policy.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Namespace to manage.
        #[arg(long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            interval,
            data_dir,
            namespace,
        } => {
            let mut settings = match &config {
                Some(path) => KubefluxConfig::from_file(path)?,
                None => KubefluxConfig::default(),
            };
            settings.apply_overrides(port, interval, data_dir, namespace);
            run(settings).await
        }
    }
}

async fn run(config: KubefluxConfig) -> anyhow::Result<()> {
    info!("kube-flux daemon starting");

    // ── Policy store ───────────────────────────────────────────

    let initial = config.initial_policy()?;
    let store = match config.db_path() {
        Some(db_path) => {
            if let Some(dir) = db_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let db = PolicyDb::open(&db_path)?;
            info!(path = ?db_path, "policy database opened");
            PolicyStore::open(db, initial)?
        }
        None => {
            info!("no data directory, policy changes are not persisted");
            PolicyStore::new(initial)
        }
    };

    // ── Cluster collaborators ──────────────────────────────────

    let (provider, metrics): (Arc<dyn ClusterProvider>, Arc<dyn MetricsSource>) =
        match config.cluster.provider {
            ProviderKind::Kube => {
                let kube = config.kube_config();
                let client = Arc::new(KubeClient::new(&kube)?);
                info!(
                    api_url = %kube.api_url,
                    namespace = %kube.namespace,
                    "kubernetes client ready"
                );
                (client.clone(), client)
            }
            ProviderKind::Static => {
                let cluster = Arc::new(StaticCluster::new(config.cluster.workloads.clone()));
                info!(
                    workloads = config.cluster.workloads.len(),
                    "static cluster ready"
                );
                (cluster.clone(), cluster)
            }
        };

    // ── Control loop ───────────────────────────────────────────

    let selector = config.selector();
    let mut reconciler = Reconciler::new(
        store,
        UsageAggregator::new(provider.clone(), metrics, selector.clone()),
        ReplicaController::new(provider, selector),
    );
    if let Some(advisor) = config.advisor()? {
        info!("threshold mode advisor enabled");
        reconciler = reconciler.with_advisor(Arc::new(advisor));
    }

    let control = ControlLoop::new(reconciler.clone(), config.interval()?);
    let loop_handle = control.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control_task = tokio::spawn(control.run(shutdown_rx));

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState::new(reconciler, loop_handle));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for ctrl-c, shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Let an in-flight cycle finish.
    let _ = control_task.await;

    info!("kube-flux daemon stopped");
    Ok(())
}
