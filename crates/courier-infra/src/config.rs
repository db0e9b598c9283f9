//! Endpoint configuration loader.
//!
//! Reads `endpoint.toml` from a directory and deserializes it into
//! [`EndpointConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::Path;

use courier_types::config::EndpointConfig;

/// File name looked up by [`load_endpoint_config`].
pub const CONFIG_FILE_NAME: &str = "endpoint.toml";

/// Load the configuration of `endpoint_name` from `{dir}/endpoint.toml`.
///
/// - If the file does not exist, returns `EndpointConfig::new(endpoint_name)`.
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file leaves `endpoint_name` empty, `endpoint_name` is filled in.
pub async fn load_endpoint_config(dir: &Path, endpoint_name: &str) -> EndpointConfig {
    let config_path = dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return EndpointConfig::new(endpoint_name);
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EndpointConfig::new(endpoint_name);
        }
    };

    match toml::from_str::<EndpointConfig>(&content) {
        Ok(mut config) => {
            if config.endpoint_name.trim().is_empty() {
                config.endpoint_name = endpoint_name.to_string();
            }
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EndpointConfig::new(endpoint_name)
        }
    }
}
