//! Per-channel rate limiting.
//!
//! Token-bucket limiters keyed either globally per channel or per
//! (channel, recipient). Buckets are created lazily inside a single
//! mutex-guarded registry and never reset; the buckets themselves are
//! internally synchronized. `wait` blocks until a token is available or the
//! caller's cancellation token fires.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::models::ChannelKind;

/// Limiter scope: one bucket per channel, or one per (channel, recipient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterKey {
    Global(ChannelKind),
    PerRecipient(ChannelKind, i64),
}

impl LimiterKey {
    fn channel(&self) -> ChannelKind {
        match self {
            LimiterKey::Global(c) => *c,
            LimiterKey::PerRecipient(c, _) => *c,
        }
    }
}

/// Waiting for a token was interrupted by cancellation.
#[derive(Debug, thiserror::Error)]
#[error("rate limit wait cancelled")]
pub struct WaitCancelled;

/// Token bucket with fractional refill.
struct TokenBucket {
    state: Mutex<BucketState>,
    /// Tokens per second
    rate: f64,
    /// Maximum tokens (burst)
    capacity: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: u32) -> Self {
        let rate = f64::from(rate.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            rate,
            capacity: rate,
        }
    }

    /// Take one token, or report how long until one becomes available.
    fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().expect("bucket lock poisoned");

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.rate))
        }
    }
}

/// Registry of lazily-created limiters, one bucket per key.
pub struct RateLimiterRegistry {
    buckets: Mutex<HashMap<LimiterKey, std::sync::Arc<TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn rate_for(&self, channel: ChannelKind) -> u32 {
        match channel {
            ChannelKind::Email => self.config.email_per_second,
            ChannelKind::Telegram => self.config.telegram_per_second,
            // SMS shares the email budget; Twilio enforces its own caps upstream.
            ChannelKind::Sms => self.config.email_per_second,
        }
    }

    fn bucket(&self, key: LimiterKey) -> std::sync::Arc<TokenBucket> {
        let mut buckets = self.buckets.lock().expect("registry lock poisoned");
        buckets
            .entry(key)
            .or_insert_with(|| std::sync::Arc::new(TokenBucket::new(self.rate_for(key.channel()))))
            .clone()
    }

    /// Block until one token is available for `key`, or the cancellation
    /// token fires.
    pub async fn wait(&self, key: LimiterKey, cancel: &CancellationToken) -> Result<(), WaitCancelled> {
        let bucket = self.bucket(key);

        loop {
            match bucket.try_acquire() {
                Ok(()) => return Ok(()),
                Err(delay) => {
                    debug!(?key, delay_ms = delay.as_millis() as u64, "rate limited, waiting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(WaitCancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
