use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the HTTP server, the topic broker and history storage.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub storage: StorageSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Retained messages per history-enabled topic.
    pub max_history_size: usize,
    /// Keys starting with this prefix keep history.
    pub history_prefix: String,
    /// Live messages buffered per subscriber on top of its replay.
    pub subscriber_buffer: usize,
    /// How long fan-out waits on a full subscriber before dropping it.
    pub send_timeout_ms: u64,
    /// Idle interval between SSE keepalive comments.
    pub keepalive_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Sled,
}

/// Where history-enabled topics are persisted.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Settings as read from sources, every field optional. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub storage: Option<PartialStorageSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_history_size: Option<usize>,
    pub history_prefix: Option<String>,
    pub subscriber_buffer: Option<usize>,
    pub send_timeout_ms: Option<u64>,
    pub keepalive_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub backend: Option<StorageBackend>,
    pub path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8001,
            },
            broker: BrokerSettings::default(),
            storage: StorageSettings {
                backend: StorageBackend::File,
                path: "via_data".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            history_prefix: "h/".to_string(),
            subscriber_buffer: 64,
            send_timeout_ms: 1000,
            keepalive_secs: 15,
        }
    }
}
