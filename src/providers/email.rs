//! SMTP email provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EmailConfig;
use crate::models::{ChannelKind, ContactPoint, Notification};
use crate::ratelimit::{LimiterKey, RateLimiterRegistry};
use crate::retry::retry;

use super::{context_block, Provider, ProviderError, SEND_ATTEMPTS, SEND_RETRY_DELAY};

pub struct EmailProvider {
    config: EmailConfig,
    limiters: Arc<RateLimiterRegistry>,
    timeout: Duration,
}

impl EmailProvider {
    pub fn new(config: EmailConfig, limiters: Arc<RateLimiterRegistry>, timeout: Duration) -> Self {
        Self {
            config,
            limiters,
            timeout,
        }
    }

    /// Typed view of the contact point configuration.
    fn recipient(contact_point: &ContactPoint) -> Result<&str, ProviderError> {
        match contact_point.config_str("email") {
            Some(addr) if !addr.is_empty() => Ok(addr),
            _ => Err(ProviderError::Config(format!(
                "email not configured for contact point {}",
                contact_point.id
            ))),
        }
    }

    fn build_message(&self, notification: &Notification, to: &str) -> Result<Message, ProviderError> {
        let from = format!("{} <{}>", self.config.from_name, self.config.username);

        let body = format!(
            "{}\n{}\n\n{}",
            notification.subject,
            context_block(&notification.context),
            notification.body
        );

        Message::builder()
            .from(from.parse().map_err(|e| {
                ProviderError::Config(format!("invalid from address {from:?}: {e}"))
            })?)
            .to(to.parse().map_err(|e| {
                ProviderError::Config(format!("invalid email address {to:?}: {e}"))
            })?)
            .subject(&notification.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ProviderError::Config(format!("failed to build email: {e}")))
    }

    fn map_smtp_error(e: lettre::transport::smtp::Error) -> ProviderError {
        // 535 and friends mean the credentials will never work; stop retrying.
        if e.is_permanent() {
            let text = e.to_string();
            if text.contains("535") || text.to_ascii_lowercase().contains("auth") {
                return ProviderError::Permanent(format!("Invalid credentials: {text}"));
            }
            return ProviderError::Permanent(text);
        }
        ProviderError::Transport(e.to_string())
    }
}

#[async_trait]
impl Provider for EmailProvider {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        contact_point: &ContactPoint,
    ) -> Result<(), ProviderError> {
        self.limiters
            .wait(
                LimiterKey::PerRecipient(ChannelKind::Email, notification.recipient_id),
                cancel,
            )
            .await
            .map_err(|_| ProviderError::RateLimited)?;

        let to = Self::recipient(contact_point)?;

        if !self.config.is_complete() {
            return Err(ProviderError::Config(
                "incomplete SMTP settings: server/username/password required".into(),
            ));
        }

        let message = self.build_message(notification, to)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)
            .map_err(Self::map_smtp_error)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build();

        debug!(to, subject = %notification.subject, "sending email");

        let mailer = &mailer;
        let message = &message;
        retry(SEND_ATTEMPTS, SEND_RETRY_DELAY, cancel, move || async move {
            mailer
                .send(message.clone())
                .await
                .map(|_| ())
                .map_err(Self::map_smtp_error)
        })
        .await?;

        info!(to, recipient_id = notification.recipient_id, "email sent");
        Ok(())
    }
}
