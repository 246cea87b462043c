//! Server configuration loading
//!
//! Resolution order: the file named by `RESTWEAVE_CONFIG`, then
//! `./restweave.toml`, then built-in defaults. Environment overrides are
//! applied on top of whichever source wins.

use restweave::ApplicationConfig;
use tracing::warn;

/// Load the application configuration
pub fn load_config() -> ApplicationConfig {
    let mut config = if let Ok(path) = std::env::var("RESTWEAVE_CONFIG") {
        match ApplicationConfig::from_file_with_env(&path) {
            Ok(config) => return validated(config),
            Err(e) => {
                warn!(path = %path, error = %e, "failed to load configured file, falling back");
                ApplicationConfig::default()
            }
        }
    } else if std::path::Path::new("restweave.toml").exists() {
        match ApplicationConfig::from_file("restweave.toml") {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load restweave.toml, using defaults");
                ApplicationConfig::default()
            }
        }
    } else {
        ApplicationConfig::default()
    };

    config.apply_env_overrides();
    validated(config)
}

fn validated(config: ApplicationConfig) -> ApplicationConfig {
    if let Err(e) = config.validate() {
        warn!(error = %e, "configuration failed validation, using defaults");
        return ApplicationConfig::default();
    }
    config
}
