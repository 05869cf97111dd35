//! Tunekit Server - Entry Point

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use tunekit_pipeline::{JobSupervisor, PipelineConfig, TrainingConfig};
use tunekit_server::{AppState, cli::Args, router, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_level.as_deref(), args.log_format)?;

    let mut config = PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;
    if let Some(bind) = args.bind {
        config.server.address = bind;
    }
    config.validate().context("Invalid pipeline configuration")?;

    if let Some(path) = &config.training_config {
        let training = TrainingConfig::check(path)
            .with_context(|| format!("Invalid training configuration {}", path.display()))?;
        info!(base_model = %training.base_model, epochs = training.epochs, "Training configuration OK");
    } else {
        warn!("No training_config set; stages read their own defaults");
    }

    let supervisor = JobSupervisor::from_config(&config).context("Failed to build pipeline")?;
    if args.check {
        info!(stages = config.stages.len(), "Configuration OK");
        return Ok(());
    }

    let app = router(AppState::new(supervisor));

    let listener = TcpListener::bind(config.server.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.address))?;
    info!(address = %config.server.address, model = %config.blob_store.model_name, "Tunekit server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("Server error")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
