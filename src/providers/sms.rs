//! Twilio SMS provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SmsConfig;
use crate::models::{ChannelKind, ContactPoint, Notification};
use crate::ratelimit::{LimiterKey, RateLimiterRegistry};
use crate::retry::retry;

use super::{context_block, Provider, ProviderError, SEND_ATTEMPTS, SEND_RETRY_DELAY};

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio error code for an unroutable destination number.
const CODE_INVALID_TO: i64 = 21211;

#[derive(Debug, Deserialize)]
struct TwilioError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct SmsProvider {
    config: SmsConfig,
    client: reqwest::Client,
    limiters: Arc<RateLimiterRegistry>,
}

impl SmsProvider {
    pub fn new(config: SmsConfig, limiters: Arc<RateLimiterRegistry>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            config,
            client,
            limiters,
        }
    }

    fn destination(contact_point: &ContactPoint) -> Result<&str, ProviderError> {
        match contact_point.config_str("phone_number") {
            Some(number) if number.starts_with('+') => Ok(number),
            Some(number) => Err(ProviderError::Permanent(format!(
                "Invalid to number: {number}"
            ))),
            None => Err(ProviderError::Config(format!(
                "phone_number not configured for contact point {}",
                contact_point.id
            ))),
        }
    }

    async fn post_message(&self, to: &str, body: &str) -> Result<(), ProviderError> {
        let url = format!("{API_BASE}/Accounts/{}/Messages.json", self.config.account_sid);
        let form = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("twilio request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::CREATED {
            return Ok(());
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Permanent(
                "Invalid credentials: twilio rejected account sid/token".into(),
            ));
        }

        let error = response.json::<TwilioError>().await.unwrap_or(TwilioError {
            code: 0,
            message: String::new(),
        });
        if error.code == CODE_INVALID_TO {
            return Err(ProviderError::Permanent(format!("Invalid to number: {to}")));
        }

        Err(ProviderError::Transport(format!(
            "twilio API returned {status} for {to}: {}",
            error.message
        )))
    }
}

#[async_trait]
impl Provider for SmsProvider {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        contact_point: &ContactPoint,
    ) -> Result<(), ProviderError> {
        self.limiters
            .wait(
                LimiterKey::PerRecipient(ChannelKind::Sms, notification.recipient_id),
                cancel,
            )
            .await
            .map_err(|_| ProviderError::RateLimited)?;

        let to = Self::destination(contact_point)?;
        let body = format!(
            "{}\n{}\n{}",
            notification.subject,
            notification.body,
            context_block(&notification.context)
        );

        debug!(to, "sending sms");

        let body = body.as_str();
        retry(SEND_ATTEMPTS, SEND_RETRY_DELAY, cancel, move || {
            self.post_message(to, body)
        })
        .await?;

        info!(to, recipient_id = notification.recipient_id, "sms sent");
        Ok(())
    }
}
