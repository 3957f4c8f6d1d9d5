use anyhow::{Context, Result};
use std::sync::Arc;
use story_service::api::{start_api_server, AppState};
use story_service::{
    ArtifactStore, ChatStoryGenerator, Config, ImageValidator, PipelineOrchestrator,
    TranslateTtsSynthesizer, UploadPolicy,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting PixTale Story Service"
    );

    config.validate().context("Invalid configuration")?;

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(ArtifactStore::new(
        config.upload.dir.clone(),
        config.api.public_prefix.clone(),
    ));
    store
        .ensure_ready()
        .await
        .context("Failed to prepare upload directory")?;

    let policy = UploadPolicy::from_config(&config.upload);
    info!(
        max_size_bytes = policy.max_size_bytes,
        allowed_types = ?policy.allowed_types,
        "Upload policy loaded"
    );

    let story_generator = Arc::new(
        ChatStoryGenerator::new(&config.provider, config.provider_timeout())
            .context("Failed to initialize story generator")?,
    );

    let audio_synthesizer = Arc::new(
        TranslateTtsSynthesizer::new(&config.speech, config.speech_timeout(), store.clone())
            .context("Failed to initialize speech synthesizer")?,
    );

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        ImageValidator::new(policy),
        story_generator,
        audio_synthesizer,
        store,
    ));

    // Create API state
    let api_state = AppState::new(orchestrator, config.api.upload_field.clone());

    info!("Story service started successfully");

    // Serve until a shutdown signal arrives; a failed bind ends the process
    start_api_server(api_state, &config.api, shutdown_signal())
        .await
        .context("Story API server failed")?;

    info!("Story service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
