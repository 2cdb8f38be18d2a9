//! Durable record of contact points, policies and notifications.
//!
//! All pipeline state lives behind the [`Store`] trait: the dispatcher reads
//! policies and writes per-attempt notification rows; the external HTTP
//! surface owns contact-point and policy mutations. Notification creates are
//! keyed by the alert id and upsert on conflict, which is what makes event
//! replay after a crash or rebalance idempotent.
//!
//! # Implementations
//!
//! - [`PgStore`]: PostgreSQL via sqlx (production)
//! - [`MemoryStore`]: in-process maps (tests and local development)

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{ContactPoint, DeliveryStatus, DispatchTask, Notification, Policy};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A status update matched zero rows.
    #[error("no notification matched alert id {0}")]
    NotFound(Uuid),

    /// A stored value no longer parses into its domain type.
    #[error("corrupt row: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a notification row keyed by the alert id; an existing row for
    /// the same id is overwritten (replayed events supersede older rows).
    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Record the final status of an attempt. Matching zero rows is an error.
    async fn update_notification_status(
        &self,
        alert_id: Uuid,
        status: DeliveryStatus,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Most recent row for the alert id, if any.
    async fn latest_notification(&self, alert_id: Uuid) -> Result<Option<Notification>, StoreError>;

    /// All active policies owned (via their contact point) by the user.
    ///
    /// Left-join semantics: a policy whose contact point is inactive or
    /// deleted is still returned with `contact_point: None` so the caller
    /// can log and skip it; an embedded contact point is always active.
    async fn policies_for_user(&self, user_id: i64) -> Result<Vec<Policy>, StoreError>;

    /// Paginated notification history for a user, newest first, with an
    /// optional status filter. Returns the page and the unfiltered-by-page
    /// total.
    async fn notifications_for_user(
        &self,
        user_id: i64,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, i64), StoreError>;

    /// Append an inbound alert event to the audit history. Best effort:
    /// callers log failures and keep going.
    async fn create_alert(&self, task: &DispatchTask) -> Result<(), StoreError>;

    /// Paginated alert history for a user, newest first, with an optional
    /// silenced filter.
    async fn alerts_for_user(
        &self,
        user_id: i64,
        silenced: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<DispatchTask>, i64), StoreError>;

    // Contact point and policy lifecycle, driven by the external HTTP
    // surface. Deletion is logical in both cases.

    async fn create_contact_point(&self, contact_point: &ContactPoint) -> Result<(), StoreError>;
    async fn get_contact_point(&self, id: Uuid) -> Result<Option<ContactPoint>, StoreError>;
    async fn update_contact_point(&self, contact_point: &ContactPoint) -> Result<(), StoreError>;
    /// Soft delete: status flips to `deleted`, history stays intact.
    async fn delete_contact_point(&self, id: Uuid) -> Result<(), StoreError>;

    async fn create_policy(&self, policy: &Policy) -> Result<(), StoreError>;
    async fn get_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError>;
    async fn update_policy(&self, policy: &Policy) -> Result<(), StoreError>;
    /// Soft delete: status flips to `inactive`.
    async fn delete_policy(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn Store>;
