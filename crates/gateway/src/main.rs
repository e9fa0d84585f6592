use annotate::backend::ort::OrtModelLoader;
use annotate::{Annotator, AnnotatorConfig, ModelLoader};
use common::{TelemetryGuard, setup_logging};
use gateway::{config::get_configuration, router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration()?;
    let annotator_config = AnnotatorConfig::from_env()?;

    let _telemetry = match &annotator_config.otel_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init("gateway", endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(
        config = ?config,
        models_dir = %annotator_config.models_dir.display(),
        "Loaded configuration"
    );

    let loader: Box<dyn ModelLoader> = Box::new(OrtModelLoader::new(&annotator_config));
    let state = AppState::new(
        Annotator::new(loader, annotator_config),
        config.images_dir.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Gateway listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
