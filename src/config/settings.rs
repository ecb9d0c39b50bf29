use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where submissions are delivered to
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_endpoint_url")]
    pub url: String,
    /// Header carrying the idempotency key
    #[serde(default = "default_idempotency_header")]
    pub idempotency_header: String,
    /// Hard ceiling on any single HTTP exchange
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

/// Retry policy for immediate delivery
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Additional attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Linear backoff step: the wait after failure `n` is `n * step`
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// 0 disables the cap
    #[serde(default)]
    pub backoff_max_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default)]
    pub backoff_jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// "memory", "file" or "redis"
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Directory used by the file backend
    #[serde(default = "default_storage_path")]
    pub path: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
    #[serde(default = "default_metrics_key")]
    pub metrics_key: String,
    /// 0 = unbounded
    #[serde(default)]
    pub max_backlog_size: usize,
    /// 0 = items never expire
    #[serde(default)]
    pub max_item_age_seconds: u64,
    /// Number of latency samples kept, 0 = all
    #[serde(default)]
    pub latency_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_true")]
    pub initially_online: bool,
    #[serde(default)]
    pub probe_enabled: bool,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Settings for the development endpoint binary
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mock_latency_ms")]
    pub latency_ms: u64,
    /// Probability (0.0 to 1.0) of answering 503
    #[serde(default = "default_mock_failure_rate")]
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_endpoint_url() -> String {
    "http://127.0.0.1:8081/api/contact".to_string()
}

fn default_idempotency_header() -> String {
    "Idempotency-Key".to_string()
}

fn default_client_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    2
}

fn default_attempt_timeout_ms() -> u64 {
    3000
}

fn default_backoff_step_ms() -> u64 {
    500
}

fn default_storage_backend() -> String {
    "file".to_string()
}

fn default_storage_path() -> String {
    ".contact-outbox".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_prefix() -> String {
    "contact_outbox".to_string()
}

fn default_queue_key() -> String {
    "contact_queue_v1".to_string()
}

fn default_metrics_key() -> String {
    "contact_metrics_v1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_probe_interval_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_mock_latency_ms() -> u64 {
    600
}

fn default_mock_failure_rate() -> f64 {
    0.2
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("delivery.max_retries", 2)?
            .set_default("delivery.attempt_timeout_ms", 3000)?
            .set_default("delivery.backoff_step_ms", 500)?
            .set_default("storage.backend", "file")?
            .set_default("mock.port", 8081)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // ENDPOINT__URL, DELIVERY__MAX_RETRIES, STORAGE__BACKEND, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn mock_addr(&self) -> String {
        format!("{}:{}", self.mock.host, self.mock.port)
    }
}

impl DeliveryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            delivery: DeliveryConfig::default(),
            storage: StorageConfig::default(),
            connectivity: ConnectivityConfig::default(),
            mock: MockConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            idempotency_header: default_idempotency_header(),
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            backoff_max_ms: 0,
            backoff_jitter: 0.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
            redis_url: default_redis_url(),
            redis_prefix: default_redis_prefix(),
            queue_key: default_queue_key(),
            metrics_key: default_metrics_key(),
            max_backlog_size: 0,
            max_item_age_seconds: 0,
            latency_window: 0,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            initially_online: true,
            probe_enabled: false,
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            latency_ms: default_mock_latency_ms(),
            failure_rate: default_mock_failure_rate(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
