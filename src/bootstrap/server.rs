use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::dispatch;
use crate::providers;
use crate::push::PushBus;
use crate::ratelimit::RateLimiterRegistry;
use crate::store::{PgStore, SharedStore};

/// Main notifyd server.
///
/// Components:
/// - Consumer: reads and deduplicates alert events from the bus
/// - Dispatcher: bounded queue + worker pool evaluating policies
/// - Providers: per-channel delivery under rate limit and retry
/// - API server: health, notification reads, WebSocket subscriptions
///
/// Shutdown is ordered: the consumer stops first so no new tasks arrive,
/// in-flight dispatch work drains, then the bus reader and API close.
pub struct Server {
    config: Config,
    store: SharedStore,
}

impl Server {
    /// Connect the backing services. Fails fast on a bad DSN.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db.max_connections)
            .connect(&config.db.dsn)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        info!(max_connections = config.db.max_connections, "database connected");

        let store: SharedStore = Arc::new(PgStore::new(pool));

        Ok(Self { config, store })
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<()> {
        let root = CancellationToken::new();
        let consumer_cancel = root.child_token();
        let dispatch_cancel = CancellationToken::new();

        let limiters = Arc::new(RateLimiterRegistry::new(self.config.rate_limits.clone()));
        let registry = providers::build_registry(&self.config, limiters);
        let push = Arc::new(PushBus::new(self.config.rate_limits.websocket_per_second));

        info!(
            channels = registry.len(),
            queue_size = self.config.dispatcher.queue_size,
            workers = self.config.dispatcher.max_workers,
            "starting dispatch engine"
        );

        let (dispatcher, dispatcher_join) = dispatch::start(
            self.config.dispatcher.clone(),
            self.store.clone(),
            registry,
            Some(push.clone()),
            dispatch_cancel.clone(),
        );

        // Invalid client configuration surfaces here as a fatal init error.
        let consumer = EventConsumer::new(&self.config.bus, dispatcher, self.store.clone())
            .context("failed to create bus consumer")?;

        info!(
            brokers = self.config.bus.brokers.len(),
            topic = %self.config.bus.topic,
            group_id = %self.config.bus.group_id,
            "consumer configured"
        );

        let consumer_join = tokio::spawn({
            let cancel = consumer_cancel.clone();
            async move { consumer.run(cancel).await }
        });

        let pinger_join = tokio::spawn({
            let push = push.clone();
            let cancel = root.child_token();
            async move { push.run_pinger(cancel).await }
        });

        let api_state = Arc::new(ApiState::new(self.store.clone(), push));
        let api_join = tokio::spawn({
            let config = self.config.api.clone();
            let cancel = root.child_token();
            async move {
                if let Err(e) = api::serve(&config, api_state, cancel).await {
                    error!(error = %e, "API server failed");
                }
            }
        });

        info!("notifyd started");

        Self::wait_for_shutdown().await;
        info!("shutdown signal received, starting graceful shutdown");

        // Stop intake first so the queue only shrinks from here on.
        consumer_cancel.cancel();
        if consumer_join.await.is_err() {
            warn!("consumer task ended abnormally");
        }

        // Let in-flight workers finish their policy evaluations.
        dispatch_cancel.cancel();
        if dispatcher_join.await.is_err() {
            warn!("dispatcher task ended abnormally");
        }

        root.cancel();
        let _ = api_join.await;
        let _ = pinger_join.await;

        info!("notifyd stopped");
        Ok(())
    }

    /// Block until the process is asked to stop (SIGINT or SIGTERM).
    #[cfg(unix)]
    async fn wait_for_shutdown() {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation cannot fail");

        tokio::select! {
            _ = signal::ctrl_c() => info!(signal = "SIGINT", "stop requested"),
            _ = sigterm.recv() => info!(signal = "SIGTERM", "stop requested"),
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown() {
        let _ = signal::ctrl_c().await;
        info!(signal = "SIGINT", "stop requested");
    }
}
