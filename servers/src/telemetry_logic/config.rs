use clap::Parser;
use lib_telemetry::connections::MqttBrokerOptions;
use lib_telemetry::core::ConnectionConfig;
use lib_telemetry::ingestors::{DEFAULT_DEAD_LETTER_CAPACITY, IngestionConfig};
use lib_telemetry::retrieve::NarrativeOptions;
use lib_telemetry::retrieve::narrative::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use lib_telemetry::sensors::{DEFAULT_DOMAIN, TopicScheme};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Sensor telemetry ingestion server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TELEMETRY_PORT", help = "Port the HTTP command surface listens on.")]
    pub port: Option<u16>,

    #[clap(long, env = "TELEMETRY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "MQTT_HOST", help = "Broker host name.")]
    pub broker_host: Option<String>,

    #[clap(long, env = "MQTT_PORT", help = "Broker port.")]
    pub broker_port: Option<u16>,

    #[clap(long, env = "MQTT_WS_PATH", help = "Websocket path on the broker; empty for plain MQTT over TCP.")]
    pub broker_ws_path: Option<String>,

    #[clap(long, env = "MQTT_TLS", help = "Use TLS (wss:// or mqtts://).")]
    pub broker_tls: Option<bool>,

    #[clap(long, env = "MQTT_USERNAME", help = "Broker username.")]
    pub broker_username: Option<String>,

    #[clap(long, env = "MQTT_PASSWORD", help = "Broker password.")]
    pub broker_password: Option<String>,

    #[clap(long, env = "MQTT_CLEAN_SESSION", help = "Discard the broker-side session on connect (loses queued at-least-once readings).")]
    pub broker_clean_session: Option<bool>,

    #[clap(long, env = "MQTT_CLIENT_ID", help = "Client identity; also scopes the keepalive topic.")]
    pub client_id: Option<String>,

    #[clap(long, env = "TELEMETRY_TOPIC_DOMAIN", help = "Topic domain the devices publish under.")]
    pub topic_domain: Option<String>,

    #[clap(long, env = "TELEMETRY_KEEPALIVE_INTERVAL_SECONDS", help = "Seconds between liveness publishes.")]
    pub keepalive_interval_seconds: Option<u64>,

    #[clap(long, env = "TELEMETRY_CONNECT_TIMEOUT_SECONDS", help = "Handshake and keepalive publish timeout in seconds.")]
    pub connect_timeout_seconds: Option<u64>,

    #[clap(long, env = "TELEMETRY_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_MAX_RECONNECT_ATTEMPTS", help = "Consecutive failures before the connection is marked failed.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL URL for reading history; readings are only logged when absent.")]
    pub database_url: Option<String>,

    #[clap(long, env = "DATABASE_POOL_SIZE", help = "Maximum pooled database connections.")]
    pub database_pool_size: Option<usize>,

    #[clap(long, env = "TELEMETRY_DEAD_LETTER_CAPACITY", help = "Failed writes kept for inspection.")]
    pub dead_letter_capacity: Option<usize>,

    #[clap(long, env = "GEMINI_API_KEY", help = "API key for the analysis model.")]
    pub narrative_api_key: Option<String>,

    #[clap(long, env = "GEMINI_MODEL", help = "Analysis model name.")]
    pub narrative_model: Option<String>,

    #[clap(long, env = "GEMINI_BASE_URL", help = "Base URL of the generative language API.")]
    pub narrative_base_url: Option<String>,

    #[clap(long, env = "TELEMETRY_STATUS_INTERVAL_SECONDS", help = "Seconds between status log lines.")]
    pub status_interval_seconds: Option<u64>,
}

fn default_client_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "local".to_string());
    format!("telemetry-{host}")
}

impl Config {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Config {
        let broker = MqttBrokerOptions::default();
        Config {
            port: Some(3000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            broker_host: Some(broker.host),
            broker_port: Some(broker.port),
            broker_ws_path: broker.ws_path,
            broker_tls: Some(broker.tls),
            broker_clean_session: Some(broker.clean_session),
            client_id: Some(default_client_id()),
            topic_domain: Some(DEFAULT_DOMAIN.to_string()),
            keepalive_interval_seconds: Some(30),
            connect_timeout_seconds: Some(10),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            max_reconnect_attempts: Some(10),
            database_pool_size: Some(5),
            dead_letter_capacity: Some(DEFAULT_DEAD_LETTER_CAPACITY),
            narrative_model: Some(DEFAULT_MODEL.to_string()),
            narrative_base_url: Some(DEFAULT_BASE_URL.to_string()),
            status_interval_seconds: Some(60),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            broker_host: other.broker_host.or(self.broker_host),
            broker_port: other.broker_port.or(self.broker_port),
            broker_ws_path: other.broker_ws_path.or(self.broker_ws_path),
            broker_tls: other.broker_tls.or(self.broker_tls),
            broker_username: other.broker_username.or(self.broker_username),
            broker_password: other.broker_password.or(self.broker_password),
            broker_clean_session: other.broker_clean_session.or(self.broker_clean_session),
            client_id: other.client_id.or(self.client_id),
            topic_domain: other.topic_domain.or(self.topic_domain),
            keepalive_interval_seconds: other.keepalive_interval_seconds.or(self.keepalive_interval_seconds),
            connect_timeout_seconds: other.connect_timeout_seconds.or(self.connect_timeout_seconds),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            database_url: other.database_url.or(self.database_url),
            database_pool_size: other.database_pool_size.or(self.database_pool_size),
            dead_letter_capacity: other.dead_letter_capacity.or(self.dead_letter_capacity),
            narrative_api_key: other.narrative_api_key.or(self.narrative_api_key),
            narrative_model: other.narrative_model.or(self.narrative_model),
            narrative_base_url: other.narrative_base_url.or(self.narrative_base_url),
            status_interval_seconds: other.status_interval_seconds.or(self.status_interval_seconds),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(3000)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(default_client_id)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_seconds.unwrap_or(60).max(1))
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(self.topic_domain.clone().unwrap_or_else(|| DEFAULT_DOMAIN.to_string()))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let defaults = ConnectionConfig::default();
        ConnectionConfig {
            client_id: self.client_id(),
            keepalive_interval: self
                .keepalive_interval_seconds
                .map_or(defaults.keepalive_interval, |s| Duration::from_secs(s.max(1))),
            connect_timeout: self
                .connect_timeout_seconds
                .map_or(defaults.connect_timeout, |s| Duration::from_secs(s.max(1))),
            reconnect_base_delay: self
                .reconnect_base_delay_ms
                .map_or(defaults.reconnect_base_delay, Duration::from_millis),
            reconnect_max_delay: self
                .reconnect_max_delay_ms
                .map_or(defaults.reconnect_max_delay, Duration::from_millis),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_reconnect_attempts),
        }
    }

    pub fn broker_options(&self) -> MqttBrokerOptions {
        let defaults = MqttBrokerOptions::default();
        MqttBrokerOptions {
            host: self.broker_host.clone().unwrap_or(defaults.host),
            port: self.broker_port.unwrap_or(defaults.port),
            // An explicitly empty path selects plain TCP.
            ws_path: match &self.broker_ws_path {
                Some(path) if path.is_empty() => None,
                Some(path) => Some(path.clone()),
                None => defaults.ws_path,
            },
            tls: self.broker_tls.unwrap_or(defaults.tls),
            username: self.broker_username.clone(),
            password: self.broker_password.clone(),
            client_id: self.client_id(),
            clean_session: self.broker_clean_session.unwrap_or(defaults.clean_session),
            ..defaults
        }
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            scheme: self.topic_scheme(),
            dead_letter_capacity: self.dead_letter_capacity.unwrap_or(DEFAULT_DEAD_LETTER_CAPACITY),
        }
    }

    pub fn narrative_options(&self) -> NarrativeOptions {
        let defaults = NarrativeOptions::default();
        NarrativeOptions {
            api_key: self.narrative_api_key.clone(),
            model: self.narrative_model.clone().unwrap_or(defaults.model),
            base_url: self.narrative_base_url.clone().unwrap_or(defaults.base_url),
            ..defaults
        }
    }
}

/// What happened to the config file layer.
///
/// Config is resolved before logging exists, so the outcome is kept and
/// reported through `log` once the subscriber is installed.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLayer {
    Loaded(PathBuf),
    Missing(PathBuf),
    Unreadable { path: PathBuf, error: String },
    Invalid { path: PathBuf, error: String },
}

impl FileLayer {
    pub fn log(&self) {
        match self {
            FileLayer::Loaded(path) => tracing::info!("Config file loaded from {}.", path.display()),
            FileLayer::Missing(path) => tracing::info!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                path.display()
            ),
            FileLayer::Unreadable { path, error } => tracing::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                path.display(),
                error
            ),
            FileLayer::Invalid { path, error } => tracing::warn!(
                "Failed to parse config file {}: {}. Falling back to other sources.",
                path.display(),
                error
            ),
        }
    }
}

/// Layers defaults < config file < environment/CLI (`cli`).
pub fn resolve_config(cli: Config) -> (Config, FileLayer) {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_telemetry.conf"));

    let (file_config, layer) = read_config_file(&config_file_path);
    let mut current_config = Config::defaults();
    if let Some(file_config) = file_config {
        current_config = current_config.merge(file_config);
    }
    (current_config.merge(cli), layer)
}

fn read_config_file(path: &Path) -> (Option<Config>, FileLayer) {
    let path_buf = path.to_path_buf();
    if !path.exists() {
        return (None, FileLayer::Missing(path_buf));
    }
    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            return (
                None,
                FileLayer::Unreadable {
                    path: path_buf,
                    error: e.to_string(),
                },
            );
        }
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(config) => (Some(config), FileLayer::Loaded(path_buf)),
        Err(e) => (
            None,
            FileLayer::Invalid {
                path: path_buf,
                error: e.to_string(),
            },
        ),
    }
}

pub fn load_config() -> (Config, FileLayer) {
    // .env first so clap sees its values as environment variables
    let _ = dotenvy::dotenv();
    resolve_config(Config::parse())
}
