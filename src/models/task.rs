use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AlertEvent, EventKind};

/// Unit of work handed from the consumer to the dispatcher.
///
/// Carries every event field plus the source topic and the original event
/// timestamp, so workers never reach back to the bus. Also doubles as the
/// audit record written to the alert history table.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchTask {
    pub alert_id: String,
    pub subject: String,
    pub body: String,
    pub recipient_id: i64,
    pub severity: i32,
    pub kind: EventKind,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub silenced: i32,

    pub station_id: i64,
    pub metric_id: i64,
    pub metric_name: String,
    pub operator: String,
    pub threshold: f64,
    pub threshold_min: f64,
    pub threshold_max: f64,
    pub value: f64,
}

impl DispatchTask {
    /// Build a task from a validated event. The subject folds the transition
    /// kind into the alert name; the body is the upstream message text.
    pub fn from_event(event: &AlertEvent, topic: &str) -> Self {
        Self {
            alert_id: event.alert_id.clone(),
            subject: format!("{}: {}", event.kind.as_str(), event.alert_name),
            body: event.message.clone(),
            recipient_id: event.user_id,
            severity: event.severity,
            kind: event.kind,
            topic: topic.to_string(),
            timestamp: event.timestamp,
            silenced: event.silenced,
            station_id: event.station_id,
            metric_id: event.metric_id,
            metric_name: event.metric_name.clone(),
            operator: event.operator.clone(),
            threshold: event.threshold,
            threshold_min: event.threshold_min,
            threshold_max: event.threshold_max,
            value: event.value,
        }
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced != 0
    }
}
