use crate::{
    auth::{build_verifier, Authenticator},
    config::Config,
    inference::InferenceOrchestrator,
    model_service::build_model,
    persistence::PersistenceCoordinator,
    pipeline::{PredictionPipeline, SystemClock},
    server::{HttpServer, SharedState},
    storage::{build_artifact_store, build_metadata_store},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub fn build_pipeline(
    config: &Config,
    metrics: Arc<Metrics>,
) -> Result<PredictionPipeline, Box<dyn Error>> {
    let model = match build_model(&config.model) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to initialize segmentation model: {:?}", e);
            return Err(e);
        }
    };

    let verifier = build_verifier(&config.auth.provider)?;
    let artifact_store = build_artifact_store(&config.storage.provider)?;
    let metadata_store = build_metadata_store(&config.metadata.provider)?;

    Ok(PredictionPipeline::new(
        Authenticator::new(verifier, &config.auth),
        InferenceOrchestrator::new(model, config.artifacts.format),
        PersistenceCoordinator::new(
            artifact_store,
            metadata_store,
            &config.artifacts,
            config.storage.timeout(),
            config.metadata.timeout(),
        ),
        Arc::new(SystemClock),
        metrics,
    ))
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let metrics = Arc::new(Metrics::new()?);
    let pipeline = Arc::new(build_pipeline(&config, metrics.clone())?);

    let state = SharedState { pipeline, metrics };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server exited with error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
