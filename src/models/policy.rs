use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContactPoint, ResourceStatus};

/// Severity comparison applied between an alert and a policy threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "NEQ")]
    Neq,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GTE")]
    Gte,
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "LTE")]
    Lte,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Eq => "EQ",
            Condition::Neq => "NEQ",
            Condition::Gt => "GT",
            Condition::Gte => "GTE",
            Condition::Lt => "LT",
            Condition::Lte => "LTE",
        }
    }

    /// Parse a stored condition code. Unknown codes yield `None` and the
    /// policy is skipped by the dispatcher.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EQ" => Some(Condition::Eq),
            "NEQ" => Some(Condition::Neq),
            "GT" => Some(Condition::Gt),
            "GTE" => Some(Condition::Gte),
            "LT" => Some(Condition::Lt),
            "LTE" => Some(Condition::Lte),
            _ => None,
        }
    }

    /// Evaluate `alert_severity <op> policy_severity`.
    pub fn matches(&self, alert_severity: i32, policy_severity: i32) -> bool {
        match self {
            Condition::Eq => alert_severity == policy_severity,
            Condition::Neq => alert_severity != policy_severity,
            Condition::Gt => alert_severity > policy_severity,
            Condition::Gte => alert_severity >= policy_severity,
            Condition::Lt => alert_severity < policy_severity,
            Condition::Lte => alert_severity <= policy_severity,
        }
    }
}

/// A rule mapping (recipient, severity comparison) to a contact point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub contact_point_id: Uuid,
    pub severity: i16,
    pub condition: Condition,
    pub action: String,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Contact point embedded by the store's left join. `None` when the
    /// referenced contact point is missing or not active; such policies are
    /// still returned so the dispatcher can log and skip them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_point: Option<ContactPoint>,
}

impl Policy {
    /// Whether the policy can be dispatched to: it must carry an embedded
    /// active contact point.
    pub fn dispatchable(&self) -> Option<&ContactPoint> {
        self.contact_point.as_ref().filter(|cp| cp.status.is_active())
    }
}
