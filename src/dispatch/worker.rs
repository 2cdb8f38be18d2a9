//! Per-task policy evaluation and delivery.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{DeliveryStatus, DispatchTask, EventKind, Notification, Policy};
use crate::providers::ProviderRegistry;
use crate::push::PushBus;
use crate::store::SharedStore;

/// Reason recorded when a resolved event repeats an already-sent value.
const REASON_RESOLVED_DUPLICATE: &str = "already sent and resolved with same value";

/// Reason recorded when a task arrives silenced.
const REASON_SILENCED: &str = "notification silenced, no dispatch";

/// Stateless task processor shared by all worker tasks.
pub struct Worker {
    store: SharedStore,
    providers: ProviderRegistry,
    push: Option<Arc<PushBus>>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        store: SharedStore,
        providers: ProviderRegistry,
        push: Option<Arc<PushBus>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            providers,
            push,
            cancel,
        }
    }

    /// Evaluate every policy of the task's recipient. A failure in one
    /// policy never prevents evaluation of its siblings.
    #[instrument(skip_all, fields(alert_id = %task.alert_id, recipient = task.recipient_id))]
    pub async fn handle_task(&self, task: DispatchTask) {
        let alert_id = match Uuid::parse_str(&task.alert_id) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "malformed alert id, dropping task");
                return;
            }
        };

        let policies = match self.store.policies_for_user(task.recipient_id).await {
            Ok(policies) => policies,
            Err(e) => {
                error!(error = %e, "failed to load policies");
                return;
            }
        };

        debug!(policies = policies.len(), "evaluating policies");

        for policy in &policies {
            self.handle_policy(&task, alert_id, policy).await;
        }
    }

    async fn handle_policy(&self, task: &DispatchTask, alert_id: Uuid, policy: &Policy) {
        if !policy.condition.matches(task.severity, i32::from(policy.severity)) {
            debug!(
                policy_id = %policy.id,
                severity = task.severity,
                condition = policy.condition.as_str(),
                threshold = policy.severity,
                "condition not satisfied, skipping policy"
            );
            return;
        }

        let Some(contact_point) = policy.dispatchable() else {
            warn!(policy_id = %policy.id, "policy has no active contact point, skipping");
            return;
        };

        let body = format!(
            "{}\nStation: {}\nMetric: {}\nValue: {:.2}\nThreshold: {:.2}",
            task.body, task.station_id, task.metric_name, task.value, task.threshold
        );

        let mut notification = Notification::pending(
            task,
            alert_id,
            policy.id,
            body,
            contact_point.kind.as_str(),
        );

        // A resolved event repeating the value of an already-delivered
        // notification carries no new information; record it as cancelled
        // instead of dispatching again. A prior failed row dispatches.
        if task.kind == EventKind::Resolved {
            match self.store.latest_notification(alert_id).await {
                Ok(Some(prev))
                    if prev.status == DeliveryStatus::Sent && prev.context.value == task.value =>
                {
                    notification.status = DeliveryStatus::Cancelled;
                    notification.error = REASON_RESOLVED_DUPLICATE.to_string();
                    if let Err(e) = self.store.create_notification(&notification).await {
                        error!(policy_id = %policy.id, error = %e, "failed to persist cancelled notification");
                    }
                    info!(policy_id = %policy.id, "resolved event duplicates sent value, cancelled");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    // Fall through and dispatch; replaying a resolved
                    // message is cheaper than losing it.
                    warn!(error = %e, "latest-notification lookup failed");
                }
            }
        }

        if let Err(e) = self.store.create_notification(&notification).await {
            error!(policy_id = %policy.id, error = %e, "failed to persist notification, skipping policy");
            return;
        }

        if task.is_silenced() {
            self.finish(alert_id, policy, DeliveryStatus::Silenced, REASON_SILENCED).await;
            info!(policy_id = %policy.id, "notification silenced");
            return;
        }

        let Some(provider) = self.providers.get(&contact_point.kind) else {
            self.finish(
                alert_id,
                policy,
                DeliveryStatus::Failed,
                &format!("unsupported provider: {}", contact_point.kind),
            )
            .await;
            return;
        };

        let result = provider.send(&self.cancel, &notification, contact_point).await;

        if let Some(push) = &self.push {
            push.send(task.recipient_id, &format!("New alert: {}", notification.subject));
        }

        match result {
            Ok(()) => {
                self.finish(alert_id, policy, DeliveryStatus::Sent, "").await;
                info!(
                    policy_id = %policy.id,
                    channel = %contact_point.kind,
                    "notification dispatched"
                );
            }
            Err(e) if e.marks_failed() => {
                error!(
                    policy_id = %policy.id,
                    channel = %contact_point.kind,
                    error = %e,
                    "dispatch failed"
                );
                self.finish(alert_id, policy, DeliveryStatus::Failed, &e.to_string()).await;
            }
            Err(_) => {
                // Shutdown mid-flight: the record stays pending and the
                // next instance replays it.
                info!(policy_id = %policy.id, "dispatch cancelled, leaving record pending");
            }
        }
    }

    /// Record the final status. Failures on this secondary write are logged
    /// and swallowed; the row keeps its previous state for the next replay.
    async fn finish(&self, alert_id: Uuid, policy: &Policy, status: DeliveryStatus, reason: &str) {
        if let Err(e) = self
            .store
            .update_notification_status(alert_id, status, reason)
            .await
        {
            error!(
                policy_id = %policy.id,
                status = status.as_str(),
                error = %e,
                "failed to update notification status"
            );
        }
    }
}
