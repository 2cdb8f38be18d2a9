use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel handled by a contact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Telegram,
    Sms,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Sms => "sms",
        }
    }

    /// Parse a stored channel string. Unknown values are surfaced to the
    /// caller so the dispatcher can skip the policy instead of panicking.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(ChannelKind::Email),
            "telegram" => Some(ChannelKind::Telegram),
            "sms" => Some(ChannelKind::Sms),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status for contact points and policies.
///
/// Deletion is logical: rows flip to `deleted`/`inactive` and stay in the
/// table so notification history keeps its foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Inactive,
    Deleted,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Inactive => "inactive",
            ResourceStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ResourceStatus::Active),
            "inactive" => Some(ResourceStatus::Inactive),
            "deleted" => Some(ResourceStatus::Deleted),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ResourceStatus::Active)
    }
}

/// A named delivery destination owning the per-channel configuration.
///
/// `configuration` stays an untyped JSON map at the store boundary for
/// compatibility with existing rows; each provider validates a typed view of
/// it at entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactPoint {
    pub id: Uuid,
    pub name: String,
    pub user_id: i64,
    pub kind: ChannelKind,
    pub configuration: serde_json::Map<String, serde_json::Value>,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactPoint {
    /// Fetch a required string field from the configuration map.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(|v| v.as_str())
    }

    /// Fetch a required integer field from the configuration map.
    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.configuration.get(key).and_then(|v| v.as_i64())
    }
}
