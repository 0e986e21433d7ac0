//! apigate - API gateway dispatcher
//!
//! Composition root: wires the metadata store, the analyser and the
//! dispatcher together and keeps the model live until shutdown.

use apigate::adapters::outbound::{LogAnalyser, MemStore, Seed};
use apigate::config::load_config;
use apigate::infrastructure::HealthCheckConfig;
use apigate::Dispatcher;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config()?;

    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    // Seed the store from disk when configured; an empty model otherwise.
    let seed = match &cfg.meta_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<Seed>(&raw)?
        }
        None => Seed::default(),
    };

    let store = Arc::new(MemStore::from_seed(seed));
    let analyser = Arc::new(LogAnalyser::new());

    let dispatcher = Dispatcher::new(
        store,
        analyser,
        HealthCheckConfig {
            timeout: Duration::from_secs(cfg.health_timeout_secs),
            max_failures: cfg.health_max_fails,
        },
    )?;

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    dispatcher.start(stop_rx).await;

    tracing::info!("apigate dispatcher running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    let _ = stop_tx.send(true);
    tracing::info!("shutting down");
    Ok(())
}
