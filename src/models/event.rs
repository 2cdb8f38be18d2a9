use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

/// State transition carried by an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Alert,
    Resolved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Alert => "alert",
            EventKind::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alert" => Some(EventKind::Alert),
            "resolved" => Some(EventKind::Resolved),
            _ => None,
        }
    }
}

/// Inbound alert event as produced on the bus.
///
/// Upstream producers are inconsistent about two fields: the kind arrives as
/// either `type_message` or `status`, and `timestamp` arrives as either an
/// ISO-8601 string or a 7-element `[y, m, d, H, M, S, ns]` array. Both
/// variants decode to the same UTC instant.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertEvent {
    pub alert_id: String,
    #[serde(default)]
    pub alert_name: String,
    #[serde(default)]
    pub station_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub message: String,
    pub severity: i32,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type_message", alias = "status")]
    pub kind: EventKind,
    #[serde(default)]
    pub metric_id: i64,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub threshold_min: f64,
    #[serde(default)]
    pub threshold_max: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub silenced: i32,
}

impl AlertEvent {
    /// Minimal validity check mirroring what the upstream contract promises.
    pub fn validate(&self) -> Result<(), String> {
        if self.alert_id.is_empty() {
            return Err("missing alert_id".into());
        }
        if self.user_id < 1 {
            return Err(format!("invalid user_id {}", self.user_id));
        }
        if self.severity < 0 {
            return Err(format!("invalid severity {}", self.severity));
        }
        Ok(())
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an ISO-8601 string or a [y,m,d,H,M,S,ns] array")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
                return Ok(dt.with_timezone(&Utc));
            }
            // Producers occasionally omit the offset; treat as UTC.
            chrono::NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Utc.from_utc_datetime(&naive))
                .map_err(|_| E::custom(format!("unrecognised timestamp: {v}")))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut parts = [0i64; 7];
            for (i, slot) in parts.iter_mut().enumerate() {
                *slot = seq
                    .next_element::<i64>()?
                    .ok_or_else(|| de::Error::invalid_length(i, &"7 timestamp components"))?;
            }
            // Drain any trailing elements rather than erroring mid-message.
            while seq.next_element::<de::IgnoredAny>()?.is_some() {}

            let [y, mo, d, h, mi, s, ns] = parts;
            let dt = Utc
                .with_ymd_and_hms(y as i32, mo as u32, d as u32, h as u32, mi as u32, s as u32)
                .single()
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp components {parts:?}")))?;
            Ok(dt + chrono::Duration::nanoseconds(ns))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_json(timestamp: &str) -> String {
        format!(
            r#"{{"alert_id":"8f5e2a40-9a1a-4a9f-9a91-2f1c2f9f0001","alert_name":"cpu high",
                "station_id":1,"user_id":7,"message":"hot","severity":5,
                "timestamp":{timestamp},"type_message":"alert",
                "metric_id":2,"metric_name":"cpu","operator":">",
                "threshold":90.0,"threshold_min":0.0,"threshold_max":100.0,"value":97.0}}"#
        )
    }

    #[test]
    fn timestamp_string_and_array_agree() {
        let from_str: AlertEvent =
            serde_json::from_str(&base_json(r#""2026-03-01T12:30:45.000000500Z""#)).unwrap();
        let from_arr: AlertEvent =
            serde_json::from_str(&base_json("[2026,3,1,12,30,45,500]")).unwrap();
        assert_eq!(from_str.timestamp, from_arr.timestamp);
    }

    #[test]
    fn timestamp_without_offset_is_utc() {
        let event: AlertEvent =
            serde_json::from_str(&base_json(r#""2026-03-01T12:30:45""#)).unwrap();
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).unwrap());
    }

    #[test]
    fn kind_accepts_status_alias() {
        let json = base_json(r#""2026-03-01T12:30:45Z""#).replace("type_message", "status");
        let event: AlertEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.kind, EventKind::Alert);
    }

    #[test]
    fn resolved_kind_parses() {
        let json = base_json(r#""2026-03-01T12:30:45Z""#).replace(r#""alert""#, r#""resolved""#);
        let event: AlertEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.kind, EventKind::Resolved);
    }

    #[test]
    fn validate_rejects_missing_identity() {
        let mut event: AlertEvent =
            serde_json::from_str(&base_json(r#""2026-03-01T12:30:45Z""#)).unwrap();
        event.alert_id.clear();
        assert!(event.validate().is_err());
        event.alert_id = "a".into();
        event.user_id = 0;
        assert!(event.validate().is_err());
    }

    #[test]
    fn malformed_timestamp_is_an_error() {
        let result: Result<AlertEvent, _> =
            serde_json::from_str(&base_json(r#""yesterday""#));
        assert!(result.is_err());
    }
}
