mod cli;

use crate::cli::{LogFormat, CLI};
use anyhow::Context;
use clap::Parser;
use snip_core::ReadStorage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        storage_backend = %config.storage,
        clear_on_start = config.clear_on_start,
        "starting snip server"
    );

    let storage = snip_storage::open(config.storage_config()?)
        .await
        .context("failed to open storage")?;

    if !storage.ping().await {
        warn!("storage did not answer ping");
    }
    match storage.stats().await {
        Ok(stats) => info!(urls = stats.urls, users = stats.users, "storage stats"),
        Err(e) => warn!(error = %e, "failed to read storage stats"),
    }

    // transports plug in here with clones of `storage` and `queue`
    let (queue, deleter) = snip_deleter::spawn(storage.clone(), config.deleter_config());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    drop(queue);
    deleter.shutdown().await;
    storage.close().await;
    info!("snip server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
