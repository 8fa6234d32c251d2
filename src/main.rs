mod cli;
mod cluster;
mod config;
mod error;
mod ingress;
mod proxy;
mod reconcile;
mod routing;
mod server;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::future;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use cli::Args;
use cluster::{IngressWatch, KubeCluster, KubeIngresses};
use config::{Config, LogFormat};
use proxy::{HeaderPolicy, ProxyFactory};
use reconcile::{Reconciler, Trigger};
use routing::{BackendResolver, ClassFilter, RouteBuilder, RoutingTable};
use server::HttpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    init_tracing(&config);

    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    info!(
        class = %config.ingress_class,
        listen = %config.listen,
        namespace = config.namespace.as_deref().unwrap_or("(all)"),
        "Starting ingress gateway"
    );

    let client = kube_client(&config).await?;

    let policy = match config.unsafe_header_pattern.clone() {
        Some(pattern) => HeaderPolicy::new(pattern),
        None => HeaderPolicy::with_default_pattern()?,
    };
    let proxies = ProxyFactory::new(&config.transport, policy)
        .context("failed to build backend client")?;
    if config.transport.insecure_skip_verify {
        warn!("Backend TLS certificates are not verified");
    }

    let ingresses = KubeIngresses::new(
        client.clone(),
        config.namespace.as_deref(),
        config.query_timeout(),
    );
    let cluster = KubeCluster::new(client, config.query_timeout());
    let builder = RouteBuilder::new(BackendResolver::new(Arc::new(cluster)), proxies);
    let table = Arc::new(RoutingTable::new());
    let trigger = Trigger::default();

    let (synced_tx, synced_rx) = oneshot::channel();
    let watching = tokio::spawn(IngressWatch::new(ingresses.api()).run(trigger.clone(), synced_tx));

    reconcile::wait_for_sync(synced_rx, config.sync_timeout()).await?;

    let mut reconciler = Reconciler::new(
        Arc::new(ingresses),
        builder,
        table.clone(),
        ClassFilter::new(config.ingress_class.clone(), config.empty_class_policy),
        trigger,
    )
    .with_pass_timeout(config.pass_timeout())
    .with_resync_period(config.resync_period());

    let summary = reconciler
        .run_once()
        .await
        .context("initial reconciliation failed")?;
    info!(%summary, "Initial routing table ready");

    let server = HttpServer::bind(config.listen, table)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciling = tokio::spawn(reconciler.run(shutdown_signaled(shutdown_rx.clone())));
    let serving = tokio::spawn(server.run(shutdown_signaled(shutdown_rx)));

    shutdown_requested().await;
    info!("Shutting down");

    // Receivers may already be gone if a task ended on its own.
    let _ = shutdown_tx.send(true);
    watching.abort();

    reconciling.await?;
    serving.await??;

    Ok(())
}

fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level()));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .compact()
                .init();
        }
    }
}

/// Explicit kubeconfig when configured, otherwise in-cluster or default
/// kubeconfig discovery.
async fn kube_client(config: &Config) -> anyhow::Result<Client> {
    match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            let options = KubeConfigOptions::default();
            let client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .context("invalid kubeconfig")?;
            Client::try_from(client_config).context("failed to create cluster client")
        }
        None => Client::try_default()
            .await
            .context("failed to create cluster client"),
    }
}

async fn shutdown_signaled(mut shutdown: watch::Receiver<bool>) {
    // An error means the sender is gone, which also means shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_requested() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl-C");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let term = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
}
