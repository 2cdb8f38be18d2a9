//! Dispatch engine.
//!
//! Turns enqueued alert tasks into provider calls:
//! 1. Receive a task from the bounded queue
//! 2. Load the recipient's policies from the store
//! 3. Evaluate each policy's severity condition
//! 4. Persist a pending notification per matching policy
//! 5. Deliver through the channel provider under rate limit and retry
//! 6. Record exactly one final status per attempt
//! 7. Push a compact summary to connected real-time subscribers

mod worker;

pub use worker::Worker;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DispatcherConfig;
use crate::models::DispatchTask;
use crate::providers::ProviderRegistry;
use crate::push::PushBus;
use crate::store::SharedStore;

/// Handle for enqueueing tasks into the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatchTask>,
}

impl DispatcherHandle {
    /// Non-blocking enqueue. A full queue drops the task: the upstream is
    /// the bus and its offset is committed either way, so blocking the
    /// consumer would only stall the partition.
    pub fn queue_task(&self, task: DispatchTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                error!(alert_id = %task.alert_id, "dispatch queue full, dropping task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                error!(alert_id = %task.alert_id, "dispatch queue closed, dropping task");
                false
            }
        }
    }
}

/// Dispatcher run loop: receives tasks and fans them out to a bounded pool
/// of worker tasks.
pub struct Dispatcher {
    rx: mpsc::Receiver<DispatchTask>,
    worker: Arc<Worker>,
    cancel: CancellationToken,
    max_workers: usize,
}

impl Dispatcher {
    /// Run until cancellation, then drain in-flight workers.
    pub async fn run(mut self) {
        info!(workers = self.max_workers, "dispatcher started");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("dispatcher shutting down");
                    break;
                }

                task = self.rx.recv() => {
                    let Some(task) = task else {
                        info!("dispatch queue closed");
                        break;
                    };

                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let worker = self.worker.clone();

                    // A panic inside the task aborts only that task; the
                    // permit is released during unwind and the pool loops on.
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.handle_task(task).await;
                    });
                }
            }
        }

        // Wait for every in-flight worker to return its permit.
        let _ = semaphore.acquire_many(self.max_workers as u32).await;
        info!("dispatcher drained");
    }
}

/// Start the dispatch subsystem. Returns the enqueue handle and the join
/// handle the caller awaits during shutdown to let in-flight work drain.
pub fn start(
    config: DispatcherConfig,
    store: SharedStore,
    providers: ProviderRegistry,
    push: Option<Arc<PushBus>>,
    cancel: CancellationToken,
) -> (DispatcherHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.queue_size);

    let dispatcher = Dispatcher {
        rx,
        worker: Arc::new(Worker::new(store, providers, push, cancel.clone())),
        cancel,
        max_workers: config.max_workers,
    };

    let join = tokio::spawn(async move {
        dispatcher.run().await;
        info!("dispatcher stopped");
    });

    (DispatcherHandle { tx }, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn task(alert_id: &str) -> DispatchTask {
        DispatchTask {
            alert_id: alert_id.to_string(),
            subject: "alert: cpu".into(),
            body: "hot".into(),
            recipient_id: 7,
            severity: 5,
            kind: EventKind::Alert,
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

    #[tokio::test]
    async fn queue_full_drops_and_reports() {
        // One-slot queue with no consumer attached, so the second enqueue
        // hits the full-queue path.
        let (tx, _rx) = mpsc::channel(1);
        let handle = DispatcherHandle { tx };

        assert!(handle.queue_task(task("a")));
        assert!(!handle.queue_task(task("b")));
    }

    #[tokio::test]
    async fn worker_accepts_next_task_after_completing_one() {
        let cancel = CancellationToken::new();
        let store = Arc::new(MemoryStore::new());
        let (handle, _join) = start(
            DispatcherConfig {
                queue_size: 2,
                max_workers: 1,
                ..Default::default()
            },
            store.clone(),
            ProviderRegistry::new(),
            None,
            cancel.clone(),
        );

        // No policies exist, so tasks complete immediately; the point is
        // that both get picked up by the single worker.
        assert!(handle.queue_task(task("11111111-1111-1111-1111-111111111111")));
        assert!(handle.queue_task(task("22222222-2222-2222-2222-222222222222")));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(handle.queue_task(task("33333333-3333-3333-3333-333333333333")));

        cancel.cancel();
    }
}
