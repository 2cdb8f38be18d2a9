use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for notifyd
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Message bus intake
    pub bus: BusConfig,

    /// Database connection
    pub db: DbConfig,

    /// SMTP settings for the email provider
    #[serde(default)]
    pub email: EmailConfig,

    /// Twilio settings for the SMS provider (optional channel)
    #[serde(default)]
    pub sms: Option<SmsConfig>,

    /// HTTP surface (health, notification reads, websocket push)
    #[serde(default)]
    pub api: ApiConfig,

    /// Dispatch queue and worker pool
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Per-channel rate limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Logging
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Kafka consumer-group configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker bootstrap addresses
    #[serde(default)]
    pub brokers: Vec<String>,

    /// Topic carrying alert events
    #[serde(default)]
    pub topic: String,

    /// Consumer group id (shared by all instances)
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    /// PostgreSQL DSN
    #[serde(default)]
    pub dsn: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Display name used in the From header
    #[serde(default)]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_name: String::new(),
        }
    }
}

impl EmailConfig {
    /// All fields required to authenticate are present.
    pub fn is_complete(&self) -> bool {
        !self.smtp_server.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Path prefix for every route
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            base_path: default_base_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Bounded task queue capacity; enqueues beyond it are dropped
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Concurrent worker count
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Deadline applied to each provider call
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub provider_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            max_workers: default_max_workers(),
            provider_timeout: default_provider_timeout(),
        }
    }
}

/// Tokens per second for each channel; burst equals the rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Per-recipient email sends per second
    #[serde(default = "default_email_rate", alias = "email_rate_limiter")]
    pub email_per_second: u32,

    /// Global Telegram sends per second
    #[serde(default = "default_telegram_rate", alias = "telegram_rate_limiter")]
    pub telegram_per_second: u32,

    /// Per-user websocket pushes per second
    #[serde(default = "default_websocket_rate", alias = "websocket_rate_limiter")]
    pub websocket_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            email_per_second: default_email_rate(),
            telegram_per_second: default_telegram_rate(),
            websocket_per_second: default_websocket_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (overridden by RUST_LOG)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// JSON log format
    #[serde(default)]
    pub json_logs: bool,

    /// When set, logs are also appended to a daily file under this directory
    #[serde(default, alias = "dir")]
    pub log_dir: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            log_dir: None,
        }
    }
}

fn default_group_id() -> String {
    "notifyd".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_smtp_port() -> u16 {
    587
}

fn default_api_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/api/v0".to_string()
}

fn default_queue_size() -> usize {
    500
}

fn default_max_workers() -> usize {
    10
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_email_rate() -> u32 {
    2
}

fn default_telegram_rate() -> u32 {
    30
}

fn default_websocket_rate() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}
