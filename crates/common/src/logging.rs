use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::Identity, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
pub fn setup_logging(environment: Environment) {
    install::<Identity>(environment, None);
}

/// Installs the global subscriber with an optional extra layer underneath the
/// filter. Telemetry passes its OpenTelemetry bridge through here.
pub(crate) fn install<L>(environment: Environment, extra: Option<L>)
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(extra).with(env_filter);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}
