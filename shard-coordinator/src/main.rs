use anyhow::Context;
use envconfig::Envconfig;
use shard_coordinator::config::Config;
use shard_coordinator::server::{Server, ServerDeps};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);
    tracing_subscriber::registry()
        .with(log_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env().context("failed to load configuration")?;

    tracing::info!("Starting shard-coordinator");
    tracing::info!("etcd endpoints: {:?}", config.etcd_endpoint_list());
    tracing::info!("Assignment policy: {}", config.assignment_policy);
    tracing::info!("Catalog provider: {}", config.system_catalog_provider);

    let server = Server::start(config, ServerDeps::default())
        .await
        .context("failed to start shard coordinator")?;

    shutdown_signal().await;
    server.shutdown().await;

    Ok(())
}
