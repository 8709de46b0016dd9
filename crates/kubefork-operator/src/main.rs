//! kubefork operator - per-developer forks of microservices behind a shared gateway

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kubefork_common::crd::{Fork, ForkManager, RouteOverride};
use kubefork_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use kubefork_common::{KubeStore, ResourceStore};
use kubefork_operator::{build_controllers, Context, ControllerConfig, DEADLINE_CHANNEL_CAPACITY};
use kubefork_reconcile::{DeadlineWatcher, Reconciler};

/// kubefork - fork microservices per developer and route their traffic by header
#[derive(Parser, Debug)]
#[command(name = "kubefork", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format (json or text)
    #[arg(long, env = "KUBEFORK_LOG_FORMAT", default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        return print_crds();
    }

    init_telemetry(TelemetryConfig {
        service_name: "kubefork-operator".to_string(),
        log_format: cli.log_format,
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

fn print_crds() -> anyhow::Result<()> {
    for crd in [Fork::crd(), ForkManager::crd(), RouteOverride::crd()] {
        let yaml = serde_yaml::to_string(&crd).context("failed to serialize CRD")?;
        println!("---\n{yaml}");
    }
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(
        Reconciler::new(store.clone()),
        config.requeue_after(),
    ));

    let (deadline_tx, deadline_rx) = mpsc::channel(DEADLINE_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let watcher = DeadlineWatcher::new(store, config.deadline_interval());
    let watcher_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { watcher.run(deadline_tx, cancel).await }
    });

    let controllers = build_controllers(
        client,
        ctx,
        config.watch_namespace.as_deref(),
        deadline_rx,
    );
    futures::future::join_all(controllers).await;

    cancel.cancel();
    watcher_task
        .await
        .context("deadline watcher task failed")?;

    tracing::info!("kubefork controller shutting down");
    Ok(())
}
