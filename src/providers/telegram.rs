//! Telegram Bot API provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::{ChannelKind, ContactPoint, Notification};
use crate::ratelimit::{LimiterKey, RateLimiterRegistry};
use crate::retry::retry;

use super::{context_block, Provider, ProviderError, SEND_ATTEMPTS, SEND_RETRY_DELAY};

const API_BASE: &str = "https://api.telegram.org";

/// Typed view of the contact point configuration.
struct TelegramTarget<'a> {
    bot_token: &'a str,
    chat_id: i64,
}

/// Error envelope returned by the Bot API on non-200 responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    description: String,
}

pub struct TelegramProvider {
    client: reqwest::Client,
    limiters: Arc<RateLimiterRegistry>,
}

impl TelegramProvider {
    pub fn new(limiters: Arc<RateLimiterRegistry>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client, limiters }
    }

    fn target(contact_point: &ContactPoint) -> Result<TelegramTarget<'_>, ProviderError> {
        let bot_token = match contact_point.config_str("bot_token") {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(ProviderError::Config(format!(
                    "bot_token not configured for contact point {}",
                    contact_point.id
                )))
            }
        };
        let chat_id = contact_point.config_i64("chat_id").ok_or_else(|| {
            ProviderError::Config(format!(
                "chat_id not configured for contact point {}",
                contact_point.id
            ))
        })?;
        Ok(TelegramTarget { bot_token, chat_id })
    }

    /// Markdown message: bold subject, body, then the context block.
    fn render(notification: &Notification) -> String {
        format!(
            "*{}*\n{}\n{}",
            notification.subject,
            notification.body,
            context_block(&notification.context)
        )
    }

    async fn post_message(
        &self,
        target: &TelegramTarget<'_>,
        text: &str,
    ) -> Result<(), ProviderError> {
        let url = format!("{API_BASE}/bot{}/sendMessage", target.bot_token);
        let payload = serde_json::json!({
            "chat_id": target.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("telegram request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let description = response
            .json::<ApiError>()
            .await
            .map(|e| e.description)
            .unwrap_or_default();

        // A missing chat will never resolve itself; everything else is
        // treated as transient.
        if description.to_ascii_lowercase().contains("chat not found") {
            return Err(ProviderError::Permanent(format!(
                "Chat ID not found: chat_id={}",
                target.chat_id
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Permanent(format!(
                "Invalid credentials: telegram returned {status}"
            )));
        }

        Err(ProviderError::Transport(format!(
            "telegram API returned {status} for chat_id={}: {description}",
            target.chat_id
        )))
    }
}

#[async_trait]
impl Provider for TelegramProvider {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        contact_point: &ContactPoint,
    ) -> Result<(), ProviderError> {
        self.limiters
            .wait(LimiterKey::Global(ChannelKind::Telegram), cancel)
            .await
            .map_err(|_| ProviderError::RateLimited)?;

        let target = Self::target(contact_point)?;
        let text = Self::render(notification);

        debug!(chat_id = target.chat_id, "sending telegram message");

        let target = &target;
        let text = text.as_str();
        retry(SEND_ATTEMPTS, SEND_RETRY_DELAY, cancel, move || {
            self.post_message(target, text)
        })
        .await?;

        info!(
            chat_id = target.chat_id,
            recipient_id = notification.recipient_id,
            "telegram message sent"
        );
        Ok(())
    }
}
