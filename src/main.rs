mod agent;
mod bridge;
mod client;
mod config;
mod export;
mod host;
mod http;
mod marshal;
mod metrics;
mod model;
mod poller;
mod store;
#[cfg(test)]
mod testing;
mod view;

use agent::AgentProcess;
use axum::serve;
use bridge::Bridge;
use clap::Parser;
use client::MetricsClient;
use config::Config;
use metrics::Metrics;
use poller::{Poller, SyncContext};
use std::net::SocketAddr;
use std::time::Duration;
use store::SnapshotStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use view::DashboardView;

const AGENT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "smcmap-bridge")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Never spawn the companion agent, even when one is configured.
    #[arg(long)]
    no_agent: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.no_agent {
        cfg.agent.executable = None;
    }

    info!(
        listen = %cfg.listen,
        agent = %cfg.agent.base_url,
        "starting smcmap-bridge"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let store = match SnapshotStore::open(&cfg.store.path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "failed to open snapshot store");
            std::process::exit(1);
        }
    };
    info!(path = %store.path().display(), records = store.count(), "snapshot store ready");

    let client = match MetricsClient::new(&cfg.agent) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build agent client");
            std::process::exit(1);
        }
    };

    let mut agent = match AgentProcess::start(&cfg.agent) {
        Ok(agent) => agent,
        Err(err) => {
            error!(error = %err, "failed to start companion agent");
            std::process::exit(1);
        }
    };
    if let Some(process) = agent.as_mut() {
        if process.wait_healthy(&client, AGENT_STARTUP_TIMEOUT).await {
            info!(pid = ?process.pid(), "companion agent is healthy");
        } else {
            warn!("companion agent did not become healthy, continuing degraded");
        }
    }

    let (view, view_handle) = DashboardView::new(metrics.clone());
    let (marshaler, presentation) = marshal::channel(view);
    tokio::spawn(async move {
        presentation.run().await;
        info!("presentation context stopped");
    });

    let ctx = SyncContext {
        client,
        store: store.clone(),
        marshaler,
        metrics: metrics.clone(),
    };
    let bridge = Bridge::start(&cfg.bridge, ctx.clone());
    if let Err(err) = bridge.load_system_info() {
        warn!(error = %err, "initial system info request rejected");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller_tasks: Vec<_> = cfg
        .pollers
        .iter()
        .map(|poller_cfg| {
            let poller = Poller::new(poller_cfg, ctx.clone());
            tokio::spawn(poller.run(shutdown_rx.clone()))
        })
        .collect();
    drop(ctx);

    let retention_task = cfg.store.retention().map(|retention| {
        tokio::spawn(poller::run_retention(
            store.clone(),
            retention,
            cfg.store.prune_interval(),
            metrics.clone(),
            shutdown_rx.clone(),
        ))
    });

    let http_task = {
        let listen = cfg.listen.clone();
        let metrics = metrics.clone();
        let bridge = bridge.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, bridge, view_handle);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind HTTP server");
                    return;
                }
            };
            info!(%addr, "presentation surface listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    for task in poller_tasks {
        let _ = task.await;
    }
    if let Some(task) = retention_task {
        let _ = task.await;
    }
    // Open event streams would otherwise hold graceful shutdown forever.
    if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, http_task).await.is_err() {
        warn!("HTTP server did not drain in time, dropping open connections");
    }
    drop(bridge);

    if let Some(process) = agent {
        if let Err(err) = process.stop().await {
            error!(error = %err, "failed to stop companion agent");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
