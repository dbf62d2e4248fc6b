mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, ServerSettings, Settings, StorageBackend, StorageSettings};

/// Default config file base name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Loads `file` (any format the `config` crate detects, optional) and then
/// `VIA__SECTION__FIELD` environment variables, merged over the defaults.
pub fn load_config_from(file: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix("VIA")
                .prefix_separator("__")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let server = partial.server;
    let broker = partial.broker;
    let storage = partial.storage;

    Ok(Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            max_history_size: broker
                .as_ref()
                .and_then(|b| b.max_history_size)
                .unwrap_or(default.broker.max_history_size)
                .max(1),
            history_prefix: broker
                .as_ref()
                .and_then(|b| b.history_prefix.clone())
                .unwrap_or(default.broker.history_prefix),
            subscriber_buffer: broker
                .as_ref()
                .and_then(|b| b.subscriber_buffer)
                .unwrap_or(default.broker.subscriber_buffer)
                .max(1),
            send_timeout_ms: broker
                .as_ref()
                .and_then(|b| b.send_timeout_ms)
                .unwrap_or(default.broker.send_timeout_ms),
            keepalive_secs: broker
                .as_ref()
                .and_then(|b| b.keepalive_secs)
                .unwrap_or(default.broker.keepalive_secs)
                .max(1),
        },
        storage: StorageSettings {
            backend: storage
                .as_ref()
                .and_then(|s| s.backend)
                .unwrap_or(default.storage.backend),
            path: storage
                .as_ref()
                .and_then(|s| s.path.clone())
                .unwrap_or(default.storage.path),
        },
    })
}
