use common::Environment;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub images_dir: PathBuf,
    #[serde(deserialize_with = "deserialize_environment")]
    pub environment: Environment,
}

fn deserialize_environment<'de, D: Deserializer<'de>>(d: D) -> Result<Environment, D::Error> {
    String::deserialize(d)?
        .parse()
        .map_err(serde::de::Error::custom)
}

/// Defaults overridden by `GATEWAY_*` environment variables.
pub fn get_configuration() -> Result<GatewayConfig, config::ConfigError> {
    let config = config::Config::builder()
        .set_default("bind_addr", "127.0.0.1:8000")?
        .set_default("images_dir", "data/images")?
        .set_default("environment", "development")?
        .add_source(
            config::Environment::with_prefix("GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config.try_deserialize::<GatewayConfig>()
}
