use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
#[cfg(feature = "clap")]
pub mod cli;
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
#[cfg(feature = "clap")]
pub use cli::CliArgs;
pub use logging::init_tracing;
pub use settings::{
    HubSettings, LoggingSettings, ServerSettings, Settings, TelemetrySettings, UpstreamSettings,
};

/// Prefix for environment overrides, e.g. `BLOCKPULSE__UPSTREAM__WS_URL`.
pub const ENV_PREFIX: &str = "BLOCKPULSE";

/// Loads the application configuration.
///
/// Sources are layered in order: built-in defaults, the TOML file at `path`
/// (optional, skipped when missing), then `BLOCKPULSE__*` environment
/// variables. The result is validated before it is returned.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );
    finish(builder)
}

/// Loads settings from an in-memory TOML document. Environment variables are not consulted.
pub fn load_config_from_str(toml: &str) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml));
    finish(builder)
}

fn finish(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Settings, ConfigError> {
    // Attempt to deserialize the entire configuration into our `Settings` struct
    let settings = builder.build()?.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
