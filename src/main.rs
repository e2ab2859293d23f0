//! hpcs-server - cache server entry point
//!
//! # Startup Sequence
//! 1. Parse command line arguments and load the YAML configuration
//! 2. Initialize the tracing subscriber per the logging section
//! 3. Create the shared cache store with the configured policy and budget
//! 4. Start the cluster membership (when enabled) and maintenance task
//! 5. Start the metrics listener (when enabled)
//! 6. Serve RESP connections until SIGINT/SIGTERM, then drain and exit

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::{watch, Notify, RwLock};
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use hpcs::cache::CacheStore;
use hpcs::cluster::Cluster;
use hpcs::config::{Config, LoggingConfig};
use hpcs::metrics::{spawn_metrics_server, AdminState, ServerMetrics};
use hpcs::protocol::CommandHandler;
use hpcs::server::Server;
use hpcs::tasks::spawn_cleanup_task;

/// Command-line arguments for the cache server.
#[derive(Parser, Debug)]
#[command(name = "hpcs-server", version, about = "High-performance cache server")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, value_name = "PATH", default_value = "configs/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hpcs-server: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config,
        "starting hpcs server"
    );

    let config = Arc::new(config);
    let cache = Arc::new(RwLock::new(CacheStore::new(
        config.cache.max_memory_bytes(),
        config.cache.eviction_policy,
    )));
    let metrics = Arc::new(ServerMetrics::new());
    let pressure = Arc::new(Notify::new());
    let cluster = Arc::new(Cluster::new(
        &config.server.listen_addr(),
        config.cluster.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    Arc::clone(&cluster).start(shutdown_rx.clone()).await;

    spawn_cleanup_task(
        cache.clone(),
        config.cache.cleanup_interval(),
        pressure.clone(),
        shutdown_rx.clone(),
    );

    if config.metrics.enabled {
        spawn_metrics_server(
            config.metrics.clone(),
            AdminState {
                cache: cache.clone(),
                metrics: metrics.clone(),
            },
            shutdown_rx.clone(),
        );
    }

    let handler = Arc::new(CommandHandler::new(
        cache,
        cluster,
        metrics.clone(),
        pressure,
    ));

    let server = match Server::bind(config.clone(), handler, metrics).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("hpcs-server: {e}");
            std::process::exit(1);
        }
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await;
    info!("server shutdown complete");
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initializes the tracing subscriber from the logging config. The level
/// seeds the default filter and stays overridable with RUST_LOG.
fn init_tracing(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("hpcs={},tower_http=info", cfg.level))
        });

    let writer = match (cfg.output.as_str(), &cfg.file) {
        ("file", Some(path)) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| {
                    eprintln!("hpcs-server: failed to open log file {path}: {e}");
                    std::process::exit(1);
                });
            BoxMakeWriter::new(Arc::new(file))
        }
        _ => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt_layer = if cfg.format == "json" {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(writer).boxed()
    };

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
