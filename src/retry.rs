//! Bounded fixed-delay retry for provider calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors that can opt out of further attempts.
pub trait Permanence {
    /// A permanent error bypasses the remaining retries.
    fn is_permanent(&self) -> bool;
}

/// Marker produced when shutdown interrupts the inter-attempt sleep.
///
/// Error types convert this into their own cancellation variant so callers
/// can tell an orderly shutdown apart from exhausted retries and leave the
/// notification record untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Invoke `op` up to `attempts` times with a fixed `delay` between attempts.
///
/// Stops early on success or on a permanent error, returning the error in
/// the failing case. When `cancel` fires during the inter-attempt sleep the
/// result is `E::from(Cancelled)` rather than the stale transient error, so
/// shutdown is distinguishable from exhaustion. No backoff at this layer.
pub async fn retry<F, Fut, E>(
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Permanence + Display + From<Cancelled>,
{
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(attempt, attempts, error = %err, "attempt failed");

                if err.is_permanent() {
                    return Err(err);
                }
                last_err = Some(err);

                if attempt < attempts {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(E::from(Cancelled)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    Err(last_err.expect("retry called with zero attempts"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Permanent,
        Cancelled,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Permanence for TestError {
        fn is_permanent(&self) -> bool {
            matches!(self, TestError::Permanent | TestError::Cancelled)
        }
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry(3, Duration::from_secs(1), &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_on_transient_failure() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry(3, Duration::from_secs(1), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::Transient) }
        })
        .await;

        assert_eq!(result.unwrap_err(), TestError::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry(3, Duration::from_secs(1), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::Permanent) }
        })
        .await;

        assert_eq!(result.unwrap_err(), TestError::Permanent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_exhaustion() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = retry(3, Duration::from_secs(60), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::Transient) }
        })
        .await;

        // The transient error from the first attempt must not leak through.
        assert_eq!(result.unwrap_err(), TestError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
