mod config;

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use playerwatch_k8s::{KubeClient, PodLocator};
use playerwatch_logs::LogStreamSupervisor;
use playerwatch_metrics::MetricsSink;

use crate::config::Config;

/// Playerwatch - exports game server player status from pod logs
#[derive(Parser, Debug)]
#[command(name = "playerwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, env = "PLAYERWATCH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Namespace of the game server
    #[arg(long, env = "PLAYERWATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Label selector for the game server pod
    #[arg(long, env = "PLAYERWATCH_SELECTOR")]
    selector: Option<String>,

    /// Container to stream logs from
    #[arg(long, env = "PLAYERWATCH_CONTAINER")]
    container: Option<String>,

    /// Kubeconfig context (defaults to in-cluster config)
    #[arg(long, env = "PLAYERWATCH_CONTEXT")]
    context: Option<String>,

    /// Seconds between discovery attempts
    #[arg(long, env = "PLAYERWATCH_DISCOVERY_INTERVAL", value_name = "SECS")]
    discovery_interval: Option<u64>,

    /// Seconds to wait after a lost log stream
    #[arg(long, env = "PLAYERWATCH_BACKOFF", value_name = "SECS")]
    backoff: Option<u64>,

    /// Reconnect when the log stream is silent this long
    #[arg(long, env = "PLAYERWATCH_IDLE_TIMEOUT", value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Number of historical log lines to replay per stream
    #[arg(long, env = "PLAYERWATCH_TAIL_LINES")]
    tail_lines: Option<i64>,

    /// Seconds of log history to replay per stream
    #[arg(long, env = "PLAYERWATCH_SINCE_SECONDS", value_name = "SECS")]
    since_seconds: Option<i64>,

    /// Address for the metrics endpoint
    #[arg(long, env = "PLAYERWATCH_METRICS_ADDR")]
    metrics_addr: Option<IpAddr>,

    /// Port for the metrics endpoint
    #[arg(long, env = "PLAYERWATCH_METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Args {
    /// Merge flags over the config file (or defaults) and validate
    fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(selector) = &self.selector {
            config.label_selector = selector.clone();
        }
        if let Some(container) = &self.container {
            config.container = container.clone();
        }
        if self.context.is_some() {
            config.context = self.context.clone();
        }
        if let Some(secs) = self.discovery_interval {
            config.discovery_interval_secs = secs;
        }
        if let Some(secs) = self.backoff {
            config.backoff_secs = secs;
        }
        if self.idle_timeout.is_some() {
            config.idle_timeout_secs = self.idle_timeout;
        }
        if self.tail_lines.is_some() {
            config.tail_lines = self.tail_lines;
        }
        if self.since_seconds.is_some() {
            config.since_seconds = self.since_seconds;
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics_addr = addr;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Run the agent
    let result = run(args).await;

    // Handle any errors
    if let Err(e) = &result {
        tracing::error!(error = %format!("{:#}", e), "playerwatch exited with an error");
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = args.resolve()?;

    // Without a working control plane connection nothing can be watched
    let kube_client = KubeClient::new(config.context.as_deref()).await?;
    kube_client
        .validate(&config.namespace)
        .await
        .context("Cannot reach the Kubernetes API")?;

    let sink = MetricsSink::new()?;
    let addr = config.metrics_socket();
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind metrics endpoint on {}", addr))?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let server = {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = playerwatch_metrics::serve(listener, sink, cancel.clone()).await;
            // A dead endpoint makes the agent useless, so stop everything
            cancel.cancel();
            result
        })
    };

    let supervisor = LogStreamSupervisor::new(
        PodLocator::new(kube_client.clone()),
        kube_client,
        sink,
        config.supervisor_config(),
    );
    supervisor.run(cancel).await;

    server
        .await
        .context("Metrics server task panicked")?
        .context("Metrics server failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
