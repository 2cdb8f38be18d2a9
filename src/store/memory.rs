//! In-memory store for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{ContactPoint, DeliveryStatus, DispatchTask, Notification, Policy, ResourceStatus};

use super::{Store, StoreError};

#[derive(Default)]
struct State {
    notifications: HashMap<Uuid, Notification>,
    contact_points: HashMap<Uuid, ContactPoint>,
    policies: HashMap<Uuid, Policy>,
    alerts: Vec<DispatchTask>,
}

/// Thread-safe map-backed store mirroring the PostgreSQL semantics:
/// notification creates upsert by id, status updates require a match, and
/// policy reads embed only active contact points.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed helper for tests.
    pub fn with_fixtures(contact_points: Vec<ContactPoint>, policies: Vec<Policy>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for cp in contact_points {
                state.contact_points.insert(cp.id, cp);
            }
            for p in policies {
                state.policies.insert(p.id, p);
            }
        }
        store
    }

    /// Snapshot of a notification row, for assertions.
    pub fn notification(&self, alert_id: Uuid) -> Option<Notification> {
        self.state.lock().unwrap().notifications.get(&alert_id).cloned()
    }

    pub fn notification_count(&self) -> usize {
        self.state.lock().unwrap().notifications.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.notifications.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn update_notification_status(
        &self,
        alert_id: Uuid,
        status: DeliveryStatus,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.notifications.get_mut(&alert_id) {
            Some(n) => {
                n.status = status;
                n.error = error.to_string();
                n.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(alert_id)),
        }
    }

    async fn latest_notification(&self, alert_id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.state.lock().unwrap().notifications.get(&alert_id).cloned())
    }

    async fn policies_for_user(&self, user_id: i64) -> Result<Vec<Policy>, StoreError> {
        let state = self.state.lock().unwrap();

        let mut result = Vec::new();
        for policy in state.policies.values() {
            if !policy.status.is_active() {
                continue;
            }
            let Some(owner) = state.contact_points.get(&policy.contact_point_id) else {
                continue;
            };
            if owner.user_id != user_id {
                continue;
            }

            let mut policy = policy.clone();
            policy.contact_point = owner.status.is_active().then(|| owner.clone());
            result.push(policy);
        }
        Ok(result)
    }

    async fn notifications_for_user(
        &self,
        user_id: i64,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, i64), StoreError> {
        let state = self.state.lock().unwrap();

        let mut rows: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.recipient_id == user_id)
            .filter(|n| status.map_or(true, |s| n.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_alert(&self, task: &DispatchTask) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.alerts.push(task.clone());
        Ok(())
    }

    async fn alerts_for_user(
        &self,
        user_id: i64,
        silenced: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<DispatchTask>, i64), StoreError> {
        let state = self.state.lock().unwrap();

        let mut rows: Vec<DispatchTask> = state
            .alerts
            .iter()
            .filter(|a| a.recipient_id == user_id)
            .filter(|a| silenced.map_or(true, |s| a.is_silenced() == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_contact_point(&self, contact_point: &ContactPoint) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.contact_points.insert(contact_point.id, contact_point.clone());
        Ok(())
    }

    async fn get_contact_point(&self, id: Uuid) -> Result<Option<ContactPoint>, StoreError> {
        Ok(self.state.lock().unwrap().contact_points.get(&id).cloned())
    }

    async fn update_contact_point(&self, contact_point: &ContactPoint) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.contact_points.contains_key(&contact_point.id) {
            return Err(StoreError::NotFound(contact_point.id));
        }
        state.contact_points.insert(contact_point.id, contact_point.clone());
        Ok(())
    }

    async fn delete_contact_point(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.contact_points.get_mut(&id) {
            Some(cp) => {
                cp.status = ResourceStatus::Deleted;
                cp.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn create_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError> {
        Ok(self.state.lock().unwrap().policies.get(&id).cloned())
    }

    async fn update_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.policies.contains_key(&policy.id) {
            return Err(StoreError::NotFound(policy.id));
        }
        state.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn delete_policy(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.policies.get_mut(&id) {
            Some(p) => {
                p.status = ResourceStatus::Inactive;
                p.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }
}
