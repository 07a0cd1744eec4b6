mod alerts;
mod collectors;
mod config;
mod http;
mod metrics;
mod notify;
mod scheduler;

use axum::serve;
use clap::Parser;
use collectors::ssh::SshConnector;
use collectors::{HostProbe, UsageSource};
use config::Config;
use metrics::Metrics;
use notify::Notifier;
use scheduler::Scheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "diskwatch")]
#[command(version)]
struct Cli {
    #[arg(long, env = "DISKWATCH_CONFIG", default_value = "./diskwatch.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Stop after this many cycles instead of running until interrupted.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..), conflicts_with = "once")]
    iterations: Option<u64>,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    match serde_yaml::to_string(&cfg.redacted()) {
        Ok(text) => debug!(config = %text, "effective configuration"),
        Err(err) => debug!(error = %err, "failed to render configuration"),
    }

    let hosts = match cfg.resolve_hosts() {
        Ok(hosts) => hosts,
        Err(err) => {
            error!(error = %err, "failed to resolve host credentials");
            std::process::exit(1);
        }
    };
    let notifiers = match cfg
        .notifications
        .iter()
        .map(Notifier::from_config)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(notifiers) => notifiers,
        Err(err) => {
            error!(error = %err, "failed to set up notification channels");
            std::process::exit(1);
        }
    };
    if notifiers.is_empty() {
        warn!("no notification channels configured, alerts will only be logged");
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    metrics.set_configured(hosts.len(), notifiers.len());

    info!(
        hosts = hosts.len(),
        channels = notifiers.len(),
        threshold_percent = cfg.threshold_percent,
        interval = %humantime::format_duration(Duration::from_secs(cfg.interval_secs)),
        "starting diskwatch"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let http_task = match &cfg.listen {
        Some(listen) => match start_http(listen, metrics.clone(), shutdown_rx.clone()).await {
            Ok(task) => Some(task),
            Err(err) => {
                error!(error = %err, listen = %listen, "failed to start HTTP server");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let signal_task = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to wait for Ctrl+C");
                return;
            }
            info!("received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(true);
        })
    };

    let cfg = Arc::new(cfg);
    let source: Arc<dyn UsageSource> = Arc::new(HostProbe::new(SshConnector::new(
        Duration::from_secs(cfg.ssh.connect_timeout_secs),
        cfg.ssh.known_hosts.clone(),
    )));
    let iterations = if cli.once { Some(1) } else { cli.iterations };

    let mut scheduler = Scheduler::new(cfg.clone(), hosts, source, notifiers, metrics);
    let cycles = scheduler.run(iterations, shutdown_rx).await;
    info!(cycles, "check loop stopped");

    let _ = shutdown_tx.send(true);
    signal_task.abort();
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

async fn start_http(
    listen: &str,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let listener = TcpListener::bind(addr).await?;
    info!(listen = %addr, "serving /healthz and /metrics");

    let app = http::build_router(metrics);
    Ok(tokio::spawn(async move {
        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "HTTP server error");
        }
    }))
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
