//! Process-local event deduplication.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Highest-seen timestamp per alert id.
///
/// Starts empty on every process start: a restarted instance may re-observe
/// events it already handled, which is tolerated because notification
/// persistence is keyed by alert id and supersedes older rows.
#[derive(Default)]
pub struct DedupTable {
    last_seen: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation. Returns `true` when the event is strictly
    /// newer than anything seen for this alert id and should be processed;
    /// equal or older timestamps return `false`.
    pub fn observe(&self, alert_id: Uuid, timestamp: DateTime<Utc>) -> bool {
        let mut last_seen = self.last_seen.lock().expect("dedup lock poisoned");
        match last_seen.get(&alert_id) {
            Some(seen) if timestamp <= *seen => false,
            _ => {
                last_seen.insert(alert_id, timestamp);
                true
            }
        }
    }

    /// Number of tracked alert ids.
    pub fn len(&self) -> usize {
        self.last_seen.lock().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, seconds).unwrap()
    }

    #[test]
    fn strictly_newer_passes() {
        let table = DedupTable::new();
        let id = Uuid::new_v4();

        assert!(table.observe(id, ts(10)));
        assert!(table.observe(id, ts(11)));
    }

    #[test]
    fn equal_timestamp_is_a_duplicate() {
        let table = DedupTable::new();
        let id = Uuid::new_v4();

        assert!(table.observe(id, ts(10)));
        assert!(!table.observe(id, ts(10)));
    }

    #[test]
    fn older_timestamp_is_discarded() {
        let table = DedupTable::new();
        let id = Uuid::new_v4();

        assert!(table.observe(id, ts(10)));
        assert!(!table.observe(id, ts(9)));
        // The newest seen timestamp still wins afterwards.
        assert!(table.observe(id, ts(11)));
    }

    #[test]
    fn ids_are_independent() {
        let table = DedupTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(table.observe(a, ts(10)));
        assert!(table.observe(b, ts(10)));
        assert_eq!(table.len(), 2);
    }
}
