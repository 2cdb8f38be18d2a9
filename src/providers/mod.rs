//! Channel providers.
//!
//! Each provider renders and delivers a single notification to one contact
//! point. Providers validate a typed view of the contact point's untyped
//! configuration map at entry, acquire their channel's rate-limit token, and
//! run the transport call under the shared bounded retry.

mod email;
mod sms;
mod telegram;

pub use email::EmailProvider;
pub use sms::SmsProvider;
pub use telegram::TelegramProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::{AlertContext, ChannelKind, ContactPoint, Notification};
use crate::ratelimit::RateLimiterRegistry;
use crate::retry::Permanence;

/// Attempts per dispatch and the fixed delay between them.
pub(crate) const SEND_ATTEMPTS: u32 = 3;
pub(crate) const SEND_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Delivery failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Missing or malformed channel configuration; never retried.
    #[error("invalid contact point configuration: {0}")]
    Config(String),

    /// Network or remote-service failure; retried with fixed delay.
    #[error("transport error: {0}")]
    Transport(String),

    /// Error class the remote will keep returning; bypasses retries.
    #[error("{0}")]
    Permanent(String),

    /// The rate limiter's wait was interrupted.
    #[error("rate limit exceeded: wait cancelled")]
    RateLimited,

    /// Orderly shutdown; the caller leaves the record untouched.
    #[error("cancelled")]
    Cancelled,
}

impl Permanence for ProviderError {
    fn is_permanent(&self) -> bool {
        !matches!(self, ProviderError::Transport(_))
    }
}

impl From<crate::retry::Cancelled> for ProviderError {
    fn from(_: crate::retry::Cancelled) -> Self {
        ProviderError::Cancelled
    }
}

impl ProviderError {
    /// Whether the outcome should be recorded as `failed`. Cancellation is
    /// the one failure that leaves the notification `pending` for the next
    /// instance to pick up.
    pub fn marks_failed(&self) -> bool {
        !matches!(self, ProviderError::Cancelled)
    }
}

/// A channel adapter delivering one rendered notification.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        contact_point: &ContactPoint,
    ) -> Result<(), ProviderError>;
}

/// Provider lookup injected into the dispatcher at construction.
pub type ProviderRegistry = HashMap<ChannelKind, Arc<dyn Provider>>;

/// Build the registry for the configured channels.
pub fn build_registry(config: &Config, limiters: Arc<RateLimiterRegistry>) -> ProviderRegistry {
    let mut registry: ProviderRegistry = HashMap::new();

    let timeout = config.dispatcher.provider_timeout;

    registry.insert(
        ChannelKind::Email,
        Arc::new(EmailProvider::new(config.email.clone(), limiters.clone(), timeout)),
    );
    registry.insert(
        ChannelKind::Telegram,
        Arc::new(TelegramProvider::new(limiters.clone(), timeout)),
    );
    if let Some(sms) = &config.sms {
        registry.insert(
            ChannelKind::Sms,
            Arc::new(SmsProvider::new(sms.clone(), limiters, timeout)),
        );
    }

    registry
}

/// Fixed metric-context block appended to every rendered message.
pub(crate) fn context_block(ctx: &AlertContext) -> String {
    format!(
        "Station: {}\nMetric: {}\nValue: {:.2}\nThreshold: {:.2}",
        ctx.station_id, ctx.metric_name, ctx.value, ctx.threshold
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(!ProviderError::Transport("timeout".into()).is_permanent());
        assert!(ProviderError::Config("missing email".into()).is_permanent());
        assert!(ProviderError::Permanent("Chat ID not found".into()).is_permanent());
        assert!(ProviderError::Cancelled.is_permanent());
    }

    #[test]
    fn cancellation_does_not_mark_failed() {
        assert!(!ProviderError::Cancelled.marks_failed());
        assert!(ProviderError::RateLimited.marks_failed());
        assert!(ProviderError::Transport("x".into()).marks_failed());
    }

    #[test]
    fn context_block_layout() {
        let block = context_block(&AlertContext {
            station_id: 1,
            metric_id: 2,
            metric_name: "cpu".into(),
            operator: ">".into(),
            threshold: 90.0,
            threshold_min: 0.0,
            threshold_max: 100.0,
            value: 97.0,
        });
        assert_eq!(block, "Station: 1\nMetric: cpu\nValue: 97.00\nThreshold: 90.00");
    }
}
