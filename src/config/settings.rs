use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::message::{MessageType, NormalizeOptions};
use crate::scheduler::{Backoff, BackoffConfig};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub message: MessageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub smssync: SmsSyncConfig,
    #[serde(default)]
    pub transports: TransportsConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body, device uploads included
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiConfig {
    /// Required `X-API-Key` for the REST routes; open when unset
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageConfig {
    /// ISO country used to read national phone numbers, e.g. `TZ`
    #[serde(default = "default_country")]
    pub default_country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Number of dispatch workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Send attempts per job, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Drain budget for in-flight jobs on shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Interval of the unsent-message recovery sweep, 0 disables it
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsSyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Route path the device polls, without the leading slash
    #[serde(default = "default_smssync_name")]
    pub endpoint: String,
    /// Shared secret the device sends on every request
    #[serde(default = "default_smssync_name")]
    pub secret: String,
    /// Answer inbound messages with the auto-reply produced by the hook
    #[serde(default = "default_true")]
    pub reply: bool,
}

/// Default transport name per channel
#[derive(Debug, Clone, Deserialize)]
pub struct TransportsConfig {
    #[serde(default = "default_sms_transport")]
    pub sms: String,
    #[serde(default = "default_push_transport")]
    pub email: String,
    #[serde(default = "default_push_transport")]
    pub push: String,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Trace sampling ratio (0.0-1.0)
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_country() -> Option<String> {
    Some("TZ".to_string())
}

fn default_queue_name() -> String {
    "messages".to_string()
}

fn default_concurrency() -> usize {
    10
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_recovery_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_smssync_name() -> String {
    "smssync".to_string()
}

fn default_sms_transport() -> String {
    "smssync".to_string()
}

fn default_push_transport() -> String {
    "echo".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "postman".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("scheduler.concurrency", default_concurrency() as i64)?
            .set_default("scheduler.attempts", default_attempts() as i64)?
            .set_default("smssync.endpoint", default_smssync_name())?
            .set_default("smssync.secret", default_smssync_name())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER_PORT, API_KEY, SMSSYNC_SECRET, TRANSPORTS_SMS, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl MessageConfig {
    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            default_country: self.default_country.clone(),
        }
    }
}

impl SchedulerConfig {
    /// Retry backoff derived from the configured delays
    pub fn backoff(&self) -> Backoff {
        Backoff::Exponential(BackoffConfig {
            initial_delay_ms: self.backoff_initial_ms,
            max_delay_ms: self.backoff_max_ms.max(self.backoff_initial_ms),
            ..BackoffConfig::default()
        })
    }
}

impl TransportsConfig {
    /// Default transport per channel
    pub fn routes(&self) -> [(MessageType, &str); 3] {
        [
            (MessageType::Sms, self.sms.as_str()),
            (MessageType::Email, self.email.as_str()),
            (MessageType::Push, self.push.as_str()),
        ]
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            default_country: default_country(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            concurrency: default_concurrency(),
            attempts: default_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            recovery_interval_secs: default_recovery_interval_secs(),
        }
    }
}

impl Default for SmsSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_smssync_name(),
            secret: default_smssync_name(),
            reply: true,
        }
    }
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self {
            sms: default_sms_transport(),
            email: default_push_transport(),
            push: default_push_transport(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
