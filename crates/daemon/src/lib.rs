pub mod adapter;
pub mod config;
pub mod jobs;
pub mod state;

use crate::config::{get_config, AppConfig};
use crate::state::build_app_state;
use std::sync::Arc;
use tgrag::providers::telegram::ClientFactory;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::FmtSubscriber;

/// Builds the state and runs the job loop until `shutdown` flips to true.
///
/// Deployments with a real MTProto vendor pass their [`ClientFactory`]
/// here; the standalone binary uses [`adapter::DisabledClientFactory`].
pub async fn run(
    config: AppConfig,
    factory: Arc<dyn ClientFactory>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    debug!(?config, "Daemon configuration loaded");

    let (app_state, ingested_rx) = build_app_state(config, factory).await?;
    jobs::run_jobs(app_state, ingested_rx, shutdown).await;
    Ok(())
}

/// The binary's main entry point: logging, configuration, signal handling.
pub async fn start() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = get_config(None)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    run(
        config,
        Arc::new(adapter::DisabledClientFactory),
        shutdown_rx,
    )
    .await
}
