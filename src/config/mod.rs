//! The `config` module loads `topicbroker` settings.
//!
//! Sources, lowest priority first: built-in defaults, an optional config
//! file (`config/default.{toml,yaml,json}` unless a path is given), and
//! environment variables prefixed with `TOPICBROKER` using `__` as the
//! nesting separator (`TOPICBROKER_TRANSPORT__TCP_TIMEOUT_MS=2000`).

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, ClientSettings, LimitSettings, LoggingSettings, NodeSettings,
    ResolverSettings, Settings, TlsSettings, TransportSettings,
};

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Loads the configuration from `path` (or the default file) and environment
/// variables, merged over `Settings::default()`.
pub fn load_config_from(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name("config/default").required(false),
    };
    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix("TOPICBROKER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
