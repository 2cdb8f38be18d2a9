//! PostgreSQL store backend.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    AlertContext, ChannelKind, Condition, ContactPoint, DeliveryStatus, DispatchTask, EventKind,
    Notification, Policy, ResourceStatus,
};

use super::{Store, StoreError};

/// Column list for `notifications` queries.
const NOTIFICATION_COLUMNS: &str = "id, created_at, updated_at, type, subject, body, \
     notification_policy_id, status, delivery_method, recipient_id, request_id, error, silenced, \
     station_id, metric_id, metric_name, operator, threshold, threshold_min, threshold_max, value";

/// Column list for `contact_points` queries.
const CONTACT_POINT_COLUMNS: &str =
    "id, name, user_id, type, configuration, status, created_at, updated_at";

/// Column list for `alert` queries.
const ALERT_COLUMNS: &str = "request_id, subject, body, recipient_id, severity, type_message, \
     topic, timestamp, silenced, station_id, metric_id, metric_name, operator, \
     threshold, threshold_min, threshold_max, value";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the count and page queries for a user's notification history.
    ///
    /// Placeholders are numbered with a running counter so LIMIT/OFFSET stay
    /// correct whether or not the status filter is present.
    fn user_notifications_queries(with_status: bool) -> (String, String) {
        let mut count = String::from("SELECT COUNT(*) FROM notifications WHERE recipient_id = $1");
        let mut list = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = $1"
        );

        let mut next_param = 2;
        if with_status {
            count.push_str(&format!(" AND status = ${next_param}"));
            list.push_str(&format!(" AND status = ${next_param}"));
            next_param += 1;
        }

        list.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            next_param,
            next_param + 1
        ));

        (count, list)
    }

    fn decode_notification(row: &PgRow) -> Result<Notification, StoreError> {
        let kind_raw: String = row.try_get("type")?;
        let kind = EventKind::parse(&kind_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown notification type {kind_raw:?}")))?;

        let status_raw: String = row.try_get("status")?;
        let status = DeliveryStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown delivery status {status_raw:?}")))?;

        Ok(Notification {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            kind,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            policy_id: row.try_get("notification_policy_id")?,
            status,
            delivery_method: row.try_get("delivery_method")?,
            recipient_id: row.try_get("recipient_id")?,
            request_id: row.try_get("request_id")?,
            error: row.try_get("error")?,
            silenced: row.try_get("silenced")?,
            context: AlertContext {
                station_id: row.try_get("station_id")?,
                metric_id: row.try_get("metric_id")?,
                metric_name: row.try_get("metric_name")?,
                operator: row.try_get("operator")?,
                threshold: row.try_get("threshold")?,
                threshold_min: row.try_get("threshold_min")?,
                threshold_max: row.try_get("threshold_max")?,
                value: row.try_get("value")?,
            },
        })
    }

    /// Build the count and page queries for a user's alert history, with
    /// the same running-counter placeholder discipline as notifications.
    fn user_alerts_queries(with_silenced: bool) -> (String, String) {
        let mut count = String::from("SELECT COUNT(*) FROM alert WHERE recipient_id = $1");
        let mut list = format!("SELECT {ALERT_COLUMNS} FROM alert WHERE recipient_id = $1");

        let mut next_param = 2;
        if with_silenced {
            count.push_str(&format!(" AND (silenced <> 0) = ${next_param}"));
            list.push_str(&format!(" AND (silenced <> 0) = ${next_param}"));
            next_param += 1;
        }

        list.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT ${} OFFSET ${}",
            next_param,
            next_param + 1
        ));

        (count, list)
    }

    fn decode_alert(row: &PgRow) -> Result<DispatchTask, StoreError> {
        let kind_raw: String = row.try_get("type_message")?;
        let kind = EventKind::parse(&kind_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown alert type {kind_raw:?}")))?;
        let request_id: Uuid = row.try_get("request_id")?;

        Ok(DispatchTask {
            alert_id: request_id.to_string(),
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            recipient_id: row.try_get("recipient_id")?,
            severity: row.try_get("severity")?,
            kind,
            topic: row.try_get("topic")?,
            timestamp: row.try_get("timestamp")?,
            silenced: row.try_get("silenced")?,
            station_id: row.try_get("station_id")?,
            metric_id: row.try_get("metric_id")?,
            metric_name: row.try_get("metric_name")?,
            operator: row.try_get("operator")?,
            threshold: row.try_get("threshold")?,
            threshold_min: row.try_get("threshold_min")?,
            threshold_max: row.try_get("threshold_max")?,
            value: row.try_get("value")?,
        })
    }

    fn decode_contact_point(row: &PgRow) -> Result<ContactPoint, StoreError> {
        let kind_raw: String = row.try_get("type")?;
        let kind = ChannelKind::parse(&kind_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown channel kind {kind_raw:?}")))?;

        let status_raw: String = row.try_get("status")?;
        let status = ResourceStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown status {status_raw:?}")))?;

        let configuration: serde_json::Value = row.try_get("configuration")?;
        let configuration = configuration
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::Decode("configuration is not a JSON object".into()))?;

        Ok(ContactPoint {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            user_id: row.try_get("user_id")?,
            kind,
            configuration,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_notification(&self, n: &Notification) -> Result<(), StoreError> {
        // Replays of the same alert id supersede the existing row.
        sqlx::query(
            "INSERT INTO notifications ( \
                id, created_at, updated_at, type, subject, body, \
                notification_policy_id, status, delivery_method, recipient_id, request_id, \
                error, silenced, station_id, metric_id, metric_name, operator, \
                threshold, threshold_min, threshold_max, value \
             ) VALUES ( \
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21 \
             ) \
             ON CONFLICT (id) DO UPDATE SET \
                created_at = EXCLUDED.created_at, \
                updated_at = EXCLUDED.updated_at, \
                type = EXCLUDED.type, \
                subject = EXCLUDED.subject, \
                body = EXCLUDED.body, \
                notification_policy_id = EXCLUDED.notification_policy_id, \
                status = EXCLUDED.status, \
                delivery_method = EXCLUDED.delivery_method, \
                recipient_id = EXCLUDED.recipient_id, \
                request_id = EXCLUDED.request_id, \
                error = EXCLUDED.error, \
                silenced = EXCLUDED.silenced, \
                station_id = EXCLUDED.station_id, \
                metric_id = EXCLUDED.metric_id, \
                metric_name = EXCLUDED.metric_name, \
                operator = EXCLUDED.operator, \
                threshold = EXCLUDED.threshold, \
                threshold_min = EXCLUDED.threshold_min, \
                threshold_max = EXCLUDED.threshold_max, \
                value = EXCLUDED.value",
        )
        .bind(n.id)
        .bind(n.created_at)
        .bind(n.updated_at)
        .bind(n.kind.as_str())
        .bind(&n.subject)
        .bind(&n.body)
        .bind(n.policy_id)
        .bind(n.status.as_str())
        .bind(&n.delivery_method)
        .bind(n.recipient_id)
        .bind(n.request_id)
        .bind(&n.error)
        .bind(n.silenced)
        .bind(n.context.station_id)
        .bind(n.context.metric_id)
        .bind(&n.context.metric_name)
        .bind(&n.context.operator)
        .bind(n.context.threshold)
        .bind(n.context.threshold_min)
        .bind(n.context.threshold_max)
        .bind(n.context.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_notification_status(
        &self,
        alert_id: Uuid,
        status: DeliveryStatus,
        error: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET status = $1, error = $2, updated_at = NOW() \
             WHERE request_id = $3",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(alert_id));
        }
        Ok(())
    }

    async fn latest_notification(&self, alert_id: Uuid) -> Result<Option<Notification>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE request_id = $1 ORDER BY updated_at DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode_notification).transpose()
    }

    async fn policies_for_user(&self, user_id: i64) -> Result<Vec<Policy>, StoreError> {
        // The user owns policies only through contact points; the join keeps
        // policies whose contact point is inactive so the dispatcher can log
        // and skip them.
        let rows = sqlx::query(
            "SELECT \
                p.id, p.contact_point_id, p.severity, p.status, p.action, p.condition_type, \
                p.created_at, p.updated_at, \
                cp.name AS cp_name, cp.type AS cp_type, cp.configuration AS cp_configuration, \
                cp.status AS cp_status, cp.created_at AS cp_created_at, cp.updated_at AS cp_updated_at \
             FROM notification_policy p \
             JOIN contact_points cp ON cp.id = p.contact_point_id AND cp.user_id = $1 \
             WHERE p.status = 'active'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in &rows {
            let policy_id: Uuid = row.try_get("id")?;

            let condition_raw: String = row.try_get("condition_type")?;
            let Some(condition) = Condition::parse(&condition_raw) else {
                warn!(policy_id = %policy_id, condition = %condition_raw, "unknown condition code, skipping policy");
                continue;
            };

            let status_raw: String = row.try_get("status")?;
            let status = ResourceStatus::parse(&status_raw)
                .ok_or_else(|| StoreError::Decode(format!("unknown status {status_raw:?}")))?;

            let cp_status_raw: String = row.try_get("cp_status")?;
            let contact_point = if ResourceStatus::parse(&cp_status_raw)
                .is_some_and(|s| s.is_active())
            {
                let cp_kind_raw: String = row.try_get("cp_type")?;
                let Some(cp_kind) = ChannelKind::parse(&cp_kind_raw) else {
                    warn!(policy_id = %policy_id, kind = %cp_kind_raw, "unknown channel kind, skipping policy");
                    continue;
                };
                let configuration: serde_json::Value = row.try_get("cp_configuration")?;

                Some(ContactPoint {
                    id: row.try_get("contact_point_id")?,
                    name: row.try_get("cp_name")?,
                    user_id,
                    kind: cp_kind,
                    configuration: configuration.as_object().cloned().unwrap_or_default(),
                    status: ResourceStatus::Active,
                    created_at: row.try_get("cp_created_at")?,
                    updated_at: row.try_get("cp_updated_at")?,
                })
            } else {
                None
            };

            policies.push(Policy {
                id: policy_id,
                contact_point_id: row.try_get("contact_point_id")?,
                severity: row.try_get("severity")?,
                condition,
                action: row.try_get("action")?,
                status,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                contact_point,
            });
        }

        Ok(policies)
    }

    async fn notifications_for_user(
        &self,
        user_id: i64,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, i64), StoreError> {
        let (count_query, list_query) = Self::user_notifications_queries(status.is_some());

        let total: i64 = {
            let mut q = sqlx::query_scalar(&count_query).bind(user_id);
            if let Some(s) = status {
                q = q.bind(s.as_str());
            }
            q.fetch_one(&self.pool).await?
        };

        let rows = {
            let mut q = sqlx::query(&list_query).bind(user_id);
            if let Some(s) = status {
                q = q.bind(s.as_str());
            }
            q.bind(limit).bind(offset).fetch_all(&self.pool).await?
        };

        let notifications = rows
            .iter()
            .map(Self::decode_notification)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((notifications, total))
    }

    async fn create_alert(&self, task: &DispatchTask) -> Result<(), StoreError> {
        let request_id = Uuid::parse_str(&task.alert_id)
            .map_err(|e| StoreError::Decode(format!("malformed alert id {}: {e}", task.alert_id)))?;

        sqlx::query(
            "INSERT INTO alert ( \
                uid, request_id, subject, body, recipient_id, severity, type_message, topic, \
                timestamp, silenced, station_id, metric_id, metric_name, operator, \
                threshold, threshold_min, threshold_max, value \
             ) VALUES ( \
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18 \
             )",
        )
        .bind(Uuid::new_v4())
        .bind(request_id)
        .bind(&task.subject)
        .bind(&task.body)
        .bind(task.recipient_id)
        .bind(task.severity)
        .bind(task.kind.as_str())
        .bind(&task.topic)
        .bind(task.timestamp)
        .bind(task.silenced)
        .bind(task.station_id)
        .bind(task.metric_id)
        .bind(&task.metric_name)
        .bind(&task.operator)
        .bind(task.threshold)
        .bind(task.threshold_min)
        .bind(task.threshold_max)
        .bind(task.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn alerts_for_user(
        &self,
        user_id: i64,
        silenced: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<DispatchTask>, i64), StoreError> {
        let (count_query, list_query) = Self::user_alerts_queries(silenced.is_some());

        let total: i64 = {
            let mut q = sqlx::query_scalar(&count_query).bind(user_id);
            if let Some(s) = silenced {
                q = q.bind(s);
            }
            q.fetch_one(&self.pool).await?
        };

        let rows = {
            let mut q = sqlx::query(&list_query).bind(user_id);
            if let Some(s) = silenced {
                q = q.bind(s);
            }
            q.bind(limit).bind(offset).fetch_all(&self.pool).await?
        };

        let alerts = rows
            .iter()
            .map(Self::decode_alert)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((alerts, total))
    }

    async fn create_contact_point(&self, cp: &ContactPoint) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO contact_points (id, name, user_id, type, configuration, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())",
        )
        .bind(cp.id)
        .bind(&cp.name)
        .bind(cp.user_id)
        .bind(cp.kind.as_str())
        .bind(serde_json::Value::Object(cp.configuration.clone()))
        .bind(cp.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_contact_point(&self, id: Uuid) -> Result<Option<ContactPoint>, StoreError> {
        let query = format!("SELECT {CONTACT_POINT_COLUMNS} FROM contact_points WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::decode_contact_point).transpose()
    }

    async fn update_contact_point(&self, cp: &ContactPoint) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE contact_points \
             SET name = $1, type = $2, configuration = $3, status = $4, updated_at = NOW() \
             WHERE id = $5",
        )
        .bind(&cp.name)
        .bind(cp.kind.as_str())
        .bind(serde_json::Value::Object(cp.configuration.clone()))
        .bind(cp.status.as_str())
        .bind(cp.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(cp.id));
        }
        Ok(())
    }

    async fn delete_contact_point(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE contact_points SET status = 'deleted', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn create_policy(&self, p: &Policy) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notification_policy \
                (id, contact_point_id, severity, status, action, condition_type, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())",
        )
        .bind(p.id)
        .bind(p.contact_point_id)
        .bind(p.severity)
        .bind(p.status.as_str())
        .bind(&p.action)
        .bind(p.condition.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query(
            "SELECT id, contact_point_id, severity, status, action, condition_type, created_at, updated_at \
             FROM notification_policy WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let condition_raw: String = row.try_get("condition_type")?;
        let condition = Condition::parse(&condition_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown condition code {condition_raw:?}")))?;
        let status_raw: String = row.try_get("status")?;
        let status = ResourceStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown status {status_raw:?}")))?;

        Ok(Some(Policy {
            id: row.try_get("id")?,
            contact_point_id: row.try_get("contact_point_id")?,
            severity: row.try_get("severity")?,
            condition,
            action: row.try_get("action")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            contact_point: None,
        }))
    }

    async fn update_policy(&self, p: &Policy) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notification_policy \
             SET contact_point_id = $1, severity = $2, status = $3, action = $4, \
                 condition_type = $5, updated_at = NOW() \
             WHERE id = $6",
        )
        .bind(p.contact_point_id)
        .bind(p.severity)
        .bind(p.status.as_str())
        .bind(&p.action)
        .bind(p.condition.as_str())
        .bind(p.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(p.id));
        }
        Ok(())
    }

    async fn delete_policy(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notification_policy SET status = 'inactive', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}
