use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DispatchTask, EventKind};

/// Metric context embedded into every notification row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    pub station_id: i64,
    pub metric_id: i64,
    pub metric_name: String,
    pub operator: String,
    pub threshold: f64,
    pub threshold_min: f64,
    pub threshold_max: f64,
    pub value: f64,
}

/// Per-attempt delivery outcome.
///
/// Every record starts `pending` and transitions exactly once to one of the
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
    Silenced,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
            DeliveryStatus::Silenced => "silenced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            // Historical rows written by the draft service used "success".
            "sent" | "success" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            "cancelled" => Some(DeliveryStatus::Cancelled),
            "silenced" => Some(DeliveryStatus::Silenced),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// Persisted record of one dispatch attempt.
///
/// `id` and `request_id` both carry the alert id, so replays and later
/// transitions update the row in place instead of accumulating duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub kind: EventKind,
    pub subject: String,
    pub body: String,
    pub policy_id: Uuid,
    pub status: DeliveryStatus,
    pub delivery_method: String,
    pub recipient_id: i64,
    pub request_id: Uuid,
    pub error: String,
    pub silenced: i32,
    pub context: AlertContext,
}

impl Notification {
    /// Construct the `pending` record for one (task, policy) evaluation.
    pub fn pending(task: &DispatchTask, alert_id: Uuid, policy_id: Uuid, body: String, delivery_method: &str) -> Self {
        let now = Utc::now();
        Self {
            id: alert_id,
            created_at: now,
            updated_at: now,
            kind: task.kind,
            subject: task.subject.clone(),
            body,
            policy_id,
            status: DeliveryStatus::Pending,
            delivery_method: delivery_method.to_string(),
            recipient_id: task.recipient_id,
            request_id: alert_id,
            error: String::new(),
            silenced: task.silenced,
            context: AlertContext {
                station_id: task.station_id,
                metric_id: task.metric_id,
                metric_name: task.metric_name.clone(),
                operator: task.operator.clone(),
                threshold: task.threshold,
                threshold_min: task.threshold_min,
                threshold_max: task.threshold_max,
                value: task.value,
            },
        }
    }
}
