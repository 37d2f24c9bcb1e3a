//! corral server entry point.
//!
//! Starts the HTTP API over an environment engine driving the docker CLI.
//! Ctrl-C stops the HTTP server and every running environment.

use corral_core::{EnvironmentEngine, HandlerRegistry, MachineDriver};
use corral_runtime::DockerCli;
use corral_server::{http, CorralConfig};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("corral_server=info".parse()?)
                .add_directive("corral_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting corral server");

    let config = CorralConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;
    config.validate_warn();

    let runtime = DockerCli::with_binary(&config.docker_binary).stop_grace_secs(config.stop_grace_secs);
    let driver = MachineDriver::from_config(Arc::new(runtime), &config.driver);
    let engine = EnvironmentEngine::new(config.engine.clone(), HandlerRegistry::native(driver));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_engine = engine.clone();
    let http_addr = config.http_addr;
    let mut shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };

        if let Err(e) = http::serve(http_engine, http_addr, shutdown).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(http_addr = %config.http_addr, "Server ready");

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    let _ = shutdown_tx.send(());

    engine.shutdown().await;

    let _ = http_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
