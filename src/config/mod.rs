mod loader;
mod types;

pub use types::{
    ApiConfig, BusConfig, Config, DbConfig, DispatcherConfig, EmailConfig, RateLimitConfig,
    SmsConfig, TelemetryConfig,
};
