//! End-to-end dispatch scenarios over the in-memory store and recording
//! stub providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use notifyd::consumer::DedupTable;
use notifyd::dispatch::{self, DispatcherHandle};
use notifyd::models::{
    ChannelKind, Condition, ContactPoint, DeliveryStatus, DispatchTask, EventKind, Notification,
    Policy, ResourceStatus,
};
use notifyd::providers::{Provider, ProviderError, ProviderRegistry};
use notifyd::retry::retry;
use notifyd::store::MemoryStore;

#[derive(Clone)]
struct RecordedCall {
    notification: Notification,
    contact_point: ContactPoint,
}

/// Stub channel adapter with the same retry contract as the real providers:
/// three attempts, one second apart, permanent errors short-circuit.
struct RecordingProvider {
    kind: ChannelKind,
    calls: Mutex<Vec<RecordedCall>>,
    transport_failures: AtomicU32,
    permanent_error: Option<String>,
}

impl RecordingProvider {
    fn succeeding(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: Mutex::new(Vec::new()),
            transport_failures: AtomicU32::new(0),
            permanent_error: None,
        })
    }

    fn failing_transport(kind: ChannelKind, times: u32) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: Mutex::new(Vec::new()),
            transport_failures: AtomicU32::new(times),
            permanent_error: None,
        })
    }

    fn failing_permanently(kind: ChannelKind, message: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: Mutex::new(Vec::new()),
            transport_failures: AtomicU32::new(0),
            permanent_error: Some(message.to_string()),
        })
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn attempt(
        &self,
        notification: &Notification,
        contact_point: &ContactPoint,
    ) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(RecordedCall {
            notification: notification.clone(),
            contact_point: contact_point.clone(),
        });

        if let Some(message) = &self.permanent_error {
            return Err(ProviderError::Permanent(message.clone()));
        }

        let remaining = self.transport_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transport_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transport("connection reset".into()));
        }

        Ok(())
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        contact_point: &ContactPoint,
    ) -> Result<(), ProviderError> {
        retry(3, Duration::from_secs(1), cancel, move || async move {
            self.attempt(notification, contact_point)
        })
        .await
    }
}

fn telegram_contact_point(user_id: i64) -> ContactPoint {
    ContactPoint {
        id: Uuid::new_v4(),
        name: "telegram".into(),
        user_id,
        kind: ChannelKind::Telegram,
        configuration: serde_json::json!({"bot_token": "T", "chat_id": 42})
            .as_object()
            .cloned()
            .unwrap(),
        status: ResourceStatus::Active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn policy_for(contact_point: &ContactPoint, severity: i16, condition: Condition) -> Policy {
    Policy {
        id: Uuid::new_v4(),
        contact_point_id: contact_point.id,
        severity,
        condition,
        action: "notify".into(),
        status: ResourceStatus::Active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        contact_point: None,
    }
}

fn cpu_task(alert_id: Uuid, severity: i32, kind: EventKind) -> DispatchTask {
    DispatchTask {
        alert_id: alert_id.to_string(),
        subject: "CPU".into(),
        body: "hot".into(),
        recipient_id: 7,
        severity,
        kind,
        topic: "alert_notification".into(),
        timestamp: Utc::now(),
        silenced: 0,
        station_id: 1,
        metric_id: 2,
        metric_name: "cpu".into(),
        operator: ">".into(),
        threshold: 90.0,
        threshold_min: 0.0,
        threshold_max: 100.0,
        value: 97.0,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    handle: DispatcherHandle,
    cancel: CancellationToken,
}

fn start_pipeline(store: Arc<MemoryStore>, provider: Arc<RecordingProvider>) -> Harness {
    let mut registry = ProviderRegistry::new();
    registry.insert(provider.kind(), provider as Arc<dyn Provider>);

    let cancel = CancellationToken::new();
    let (handle, _join) = dispatch::start(
        Default::default(),
        store.clone(),
        registry,
        None,
        cancel.clone(),
    );

    Harness { store, handle, cancel }
}

async fn wait_for_terminal_status(store: &MemoryStore, alert_id: Uuid) -> Notification {
    for _ in 0..500 {
        if let Some(n) = store.notification(alert_id) {
            if n.status.is_terminal() {
                return n;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("notification for {alert_id} never reached a terminal status");
}

/// Scenario 1: an alert matching a policy is dispatched via Telegram.
#[tokio::test]
async fn matching_policy_dispatches() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));

    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Sent);
    assert_eq!(row.id, alert_id);
    assert!(row.error.is_empty());

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.contact_point.config_i64("chat_id"), Some(42));
    assert_eq!(call.notification.subject, "CPU");
    for needle in ["cpu", "97", "90"] {
        assert!(
            call.notification.body.contains(needle),
            "body missing {needle}: {}",
            call.notification.body
        );
    }

    harness.cancel.cancel();
}

/// Scenario 2: a non-matching severity creates no row and calls no provider.
#[tokio::test]
async fn non_matching_policy_skips_dispatch() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 2, EventKind::Alert)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.store.notification(alert_id).is_none());
    assert!(provider.calls().is_empty());

    harness.cancel.cancel();
}

/// Scenario 3: a repeated event with an identical timestamp is never
/// enqueued a second time.
#[tokio::test]
async fn duplicate_timestamp_is_not_enqueued() {
    let dedup = DedupTable::new();
    let alert_id = Uuid::new_v4();
    let timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    assert!(dedup.observe(alert_id, timestamp));
    // The consumer acks without enqueueing when observe returns false.
    assert!(!dedup.observe(alert_id, timestamp));
}

/// Scenario 4: two transient transport failures, then success: exactly
/// three provider invocations and a final `sent`.
#[tokio::test(start_paused = true)]
async fn transient_failures_retry_to_success() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider = RecordingProvider::failing_transport(ChannelKind::Telegram, 2);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));

    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Sent);
    assert_eq!(provider.calls().len(), 3);

    harness.cancel.cancel();
}

/// Shutdown arriving between retry attempts leaves the record pending for
/// the next instance to replay, rather than marking it failed with the
/// stale transport error.
#[tokio::test]
async fn shutdown_mid_retry_leaves_record_pending() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    // Transport keeps failing; without shutdown this would exhaust all
    // three attempts and mark the row failed.
    let provider = RecordingProvider::failing_transport(ChannelKind::Telegram, u32::MAX);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));

    // Let the first attempt fail, then cancel during the inter-attempt sleep.
    for _ in 0..100 {
        if !provider.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(provider.calls().len(), 1);
    harness.cancel.cancel();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let row = harness.store.notification(alert_id).unwrap();
    assert_eq!(row.status, DeliveryStatus::Pending);
    assert!(row.error.is_empty(), "error was {:?}", row.error);
    assert_eq!(provider.calls().len(), 1);
}

/// Scenario 5: a permanent error short-circuits the retries and the error
/// text survives into the row.
#[tokio::test]
async fn permanent_failure_short_circuits() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider =
        RecordingProvider::failing_permanently(ChannelKind::Telegram, "Chat ID not found: chat_id=42");
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));

    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Failed);
    assert!(row.error.contains("Chat ID not found"), "error was {:?}", row.error);
    assert_eq!(provider.calls().len(), 1);

    harness.cancel.cancel();
}

/// Scenario 6: a resolved event repeating the value of an already-sent
/// notification is recorded as cancelled without a provider call.
#[tokio::test]
async fn resolved_with_same_value_is_cancelled() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));
    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Sent);
    assert_eq!(provider.calls().len(), 1);

    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Resolved)));
    for _ in 0..500 {
        if harness
            .store
            .notification(alert_id)
            .is_some_and(|n| n.status == DeliveryStatus::Cancelled)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let row = harness.store.notification(alert_id).unwrap();
    assert_eq!(row.status, DeliveryStatus::Cancelled);
    assert_eq!(row.error, "already sent and resolved with same value");
    // No second provider call for the duplicate resolution.
    assert_eq!(provider.calls().len(), 1);

    harness.cancel.cancel();
}

/// A resolved event following a failed delivery dispatches again.
#[tokio::test]
async fn resolved_after_failure_dispatches() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));

    // Fail the alert permanently, then resolve: the resolution must go out.
    let provider =
        RecordingProvider::failing_permanently(ChannelKind::Telegram, "Chat ID not found");
    let harness = start_pipeline(store.clone(), provider.clone());

    let alert_id = Uuid::new_v4();
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));
    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Failed);
    harness.cancel.cancel();

    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let harness = start_pipeline(store, provider.clone());
    assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Resolved)));

    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Sent);
    assert_eq!(provider.calls().len(), 1);

    harness.cancel.cancel();
}

/// Silenced tasks are persisted with `silenced` status and never dispatched.
#[tokio::test]
async fn silenced_task_skips_provider() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    let mut task = cpu_task(alert_id, 5, EventKind::Alert);
    task.silenced = 1;
    assert!(harness.handle.queue_task(task));

    let row = wait_for_terminal_status(&harness.store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Silenced);
    assert!(provider.calls().is_empty());

    harness.cancel.cancel();
}

/// A policy whose contact point kind has no registered provider fails with
/// a recorded reason instead of aborting sibling policies.
#[tokio::test]
async fn unsupported_channel_marks_failed() {
    let mut cp = telegram_contact_point(7);
    cp.kind = ChannelKind::Sms;
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));

    // Registry only knows telegram.
    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let mut registry = HashMap::new();
    registry.insert(ChannelKind::Telegram, provider.clone() as Arc<dyn Provider>);

    let cancel = CancellationToken::new();
    let (handle, _join) = dispatch::start(
        Default::default(),
        store.clone(),
        registry,
        None,
        cancel.clone(),
    );

    let alert_id = Uuid::new_v4();
    assert!(handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));

    let row = wait_for_terminal_status(&store, alert_id).await;
    assert_eq!(row.status, DeliveryStatus::Failed);
    assert!(row.error.contains("unsupported provider"));
    assert!(provider.calls().is_empty());

    cancel.cancel();
}

/// A panicking worker takes down only its own task; the pool keeps
/// processing.
#[tokio::test]
async fn worker_panic_does_not_kill_the_pool() {
    struct PanicOnceProvider {
        panicked: AtomicU32,
    }

    #[async_trait]
    impl Provider for PanicOnceProvider {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Telegram
        }

        async fn send(
            &self,
            _cancel: &CancellationToken,
            _notification: &Notification,
            _contact_point: &ContactPoint,
        ) -> Result<(), ProviderError> {
            if self.panicked.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("provider blew up");
            }
            Ok(())
        }
    }

    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));

    let mut registry = HashMap::new();
    registry.insert(
        ChannelKind::Telegram,
        Arc::new(PanicOnceProvider {
            panicked: AtomicU32::new(0),
        }) as Arc<dyn Provider>,
    );

    let cancel = CancellationToken::new();
    let (handle, _join) = dispatch::start(
        Default::default(),
        store.clone(),
        registry,
        None,
        cancel.clone(),
    );

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    assert!(handle.queue_task(cpu_task(first, 5, EventKind::Alert)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.queue_task(cpu_task(second, 5, EventKind::Alert)));

    let row = wait_for_terminal_status(&store, second).await;
    assert_eq!(row.status, DeliveryStatus::Sent);
    // The panicked task's row never advanced past pending.
    assert_eq!(store.notification(first).unwrap().status, DeliveryStatus::Pending);

    cancel.cancel();
}

/// Replaying the same event keeps a single row per alert id.
#[tokio::test]
async fn replay_is_idempotent() {
    let cp = telegram_contact_point(7);
    let store = Arc::new(MemoryStore::with_fixtures(
        vec![cp.clone()],
        vec![policy_for(&cp, 3, Condition::Gte)],
    ));
    let provider = RecordingProvider::succeeding(ChannelKind::Telegram);
    let harness = start_pipeline(store, provider.clone());

    let alert_id = Uuid::new_v4();
    for _ in 0..3 {
        assert!(harness.handle.queue_task(cpu_task(alert_id, 5, EventKind::Alert)));
        wait_for_terminal_status(&harness.store, alert_id).await;
    }

    assert_eq!(harness.store.notification_count(), 1);
    let row = harness.store.notification(alert_id).unwrap();
    assert_eq!(row.status, DeliveryStatus::Sent);

    harness.cancel.cancel();
}
