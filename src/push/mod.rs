//! Real-time push fan-out.
//!
//! The [`PushBus`] keeps a per-user set of subscriber sockets, capped at
//! [`MAX_SOCKETS_PER_USER`]. A socket is a handle around an unbounded channel
//! pumped into the actual WebSocket by the connection's writer task, so the
//! bus itself never performs network I/O and all operations sit under a
//! single mutex. Failed writes evict the offending socket. A background task
//! pings every socket on a fixed interval so dead peers are detected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum concurrent sockets per user; additional subscriptions are rejected.
pub const MAX_SOCKETS_PER_USER: usize = 10;

/// Interval between keepalive pings on every socket.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Frame delivered to a subscriber's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    Text(String),
    Ping,
}

/// Subscription attempt outcome.
#[derive(Debug, thiserror::Error)]
#[error("subscriber limit reached for user {user_id}")]
pub struct SubscriberLimitReached {
    pub user_id: i64,
}

/// Sending half of a subscriber socket, registered with the bus.
#[derive(Debug, Clone)]
pub struct PushSocket {
    id: u64,
    tx: mpsc::UnboundedSender<PushFrame>,
}

impl PushSocket {
    /// Create a socket and the receiving half its writer task consumes.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<PushFrame>) {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn write(&self, frame: PushFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

struct UserEntry {
    sockets: Vec<PushSocket>,
    /// Per-user push budget; refills continuously, drops when exhausted.
    tokens: f64,
    last_refill: Instant,
}

impl UserEntry {
    fn new(burst: f64) -> Self {
        Self {
            sockets: Vec::new(),
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn take_token(&mut self, rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(rate);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-user real-time fan-out.
pub struct PushBus {
    users: Mutex<HashMap<i64, UserEntry>>,
    /// Pushes per second per user; excess messages are dropped, not queued.
    rate: f64,
}

impl PushBus {
    pub fn new(pushes_per_second: u32) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            rate: f64::from(pushes_per_second.max(1)),
        }
    }

    /// Register a socket for a user. Fails once the per-user cap is reached.
    pub fn add_subscriber(&self, user_id: i64, socket: PushSocket) -> Result<(), SubscriberLimitReached> {
        let mut users = self.users.lock().expect("push bus lock poisoned");
        let entry = users.entry(user_id).or_insert_with(|| UserEntry::new(self.rate));

        if entry.sockets.len() >= MAX_SOCKETS_PER_USER {
            warn!(user_id, "subscriber limit reached");
            return Err(SubscriberLimitReached { user_id });
        }

        entry.sockets.push(socket);
        info!(user_id, total = entry.sockets.len(), "push subscriber added");
        Ok(())
    }

    /// Remove a socket by its id. Unknown ids are ignored.
    pub fn remove_subscriber(&self, user_id: i64, socket_id: u64) {
        let mut users = self.users.lock().expect("push bus lock poisoned");
        if let Some(entry) = users.get_mut(&user_id) {
            entry.sockets.retain(|s| s.id != socket_id);
            info!(user_id, remaining = entry.sockets.len(), "push subscriber removed");
            if entry.sockets.is_empty() {
                users.remove(&user_id);
            }
        }
    }

    /// Deliver a text message to every socket of a user. Sockets whose write
    /// fails are evicted. Messages beyond the per-user rate are dropped.
    pub fn send(&self, user_id: i64, message: &str) {
        let mut users = self.users.lock().expect("push bus lock poisoned");
        let Some(entry) = users.get_mut(&user_id) else {
            return;
        };

        if !entry.take_token(self.rate) {
            debug!(user_id, "push rate exceeded, dropping message");
            return;
        }

        entry.sockets.retain(|socket| {
            let ok = socket.write(PushFrame::Text(message.to_string()));
            if !ok {
                warn!(user_id, socket_id = socket.id, "push write failed, removing socket");
            }
            ok
        });

        if entry.sockets.is_empty() {
            users.remove(&user_id);
        }
    }

    /// Number of registered sockets for a user.
    pub fn subscriber_count(&self, user_id: i64) -> usize {
        self.users
            .lock()
            .expect("push bus lock poisoned")
            .get(&user_id)
            .map(|e| e.sockets.len())
            .unwrap_or(0)
    }

    fn ping_all(&self) {
        let mut users = self.users.lock().expect("push bus lock poisoned");
        users.retain(|user_id, entry| {
            let user_id = *user_id;
            entry.sockets.retain(|socket| {
                let ok = socket.write(PushFrame::Ping);
                if !ok {
                    debug!(user_id, socket_id = socket.id, "ping failed, removing socket");
                }
                ok
            });
            !entry.sockets.is_empty()
        });
    }

    /// Run the keepalive loop until cancellation.
    pub async fn run_pinger(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        // The first tick fires immediately; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("push pinger shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.ping_all();
                }
            }
        }
    }
}
