//! Bounded retry for backend operations
//!
//! [`RetryExecutor`] runs an async action under a fixed escalating delay
//! schedule. After each failure it asks a [`Classify`] implementation
//! whether to try again:
//!
//! - **NonRetriable**: stop at once, the error is wrapped as `Permanent`
//! - **Retriable**: wait for the next delay of the schedule, then retry
//!
//! A schedule of N delays allows N + 1 attempts. When every attempt fails
//! the last error is returned wrapped with the attempt count. The waits
//! can be interrupted by a cancellation future (or a deadline), in which
//! case the executor returns `Cancelled` without finishing the schedule.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, warn};

use super::classifier::{Classify, ErrorClass};
use super::error::{StorageError, StorageResult};

/// Delays between attempts used by default: 1s, 3s, 5s
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Runs actions under a bounded retry schedule
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    delays: Vec<Duration>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

impl RetryExecutor {
    /// Create an executor with a custom delay schedule
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Initial attempt plus one per delay
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `action` until it succeeds, fails permanently, or the schedule runs out
    pub async fn run<T, C, F, Fut>(
        &self,
        op: &'static str,
        classifier: &C,
        action: F,
    ) -> StorageResult<T>
    where
        C: Classify + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        self.run_until(op, classifier, std::future::pending::<()>(), action)
            .await
    }

    /// Like [`run`](Self::run), but waits are abandoned once `deadline` passes
    pub async fn run_with_deadline<T, C, F, Fut>(
        &self,
        op: &'static str,
        deadline: Instant,
        classifier: &C,
        action: F,
    ) -> StorageResult<T>
    where
        C: Classify + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        self.run_until(op, classifier, time::sleep_until(deadline), action)
            .await
    }

    /// Like [`run`](Self::run), but waits are abandoned once `cancel` completes
    pub async fn run_until<T, C, F, Fut, S>(
        &self,
        op: &'static str,
        classifier: &C,
        cancel: S,
        mut action: F,
    ) -> StorageResult<T>
    where
        C: Classify + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
        S: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match action().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", op, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if classifier.classify(&err) == ErrorClass::NonRetriable {
                return Err(match err {
                    // Rejected writes keep their own variant so callers can map them
                    StorageError::Validation(_) => err,
                    err => StorageError::Permanent {
                        op,
                        source: Box::new(err),
                    },
                });
            }

            let Some(delay) = self.delays.get(attempt - 1).copied() else {
                return Err(StorageError::RetriesExhausted {
                    op,
                    attempts: attempt,
                    source: Box::new(err),
                });
            };

            warn!(
                "{} failed on attempt {}/{}, retrying in {:?}: {}",
                op,
                attempt,
                self.max_attempts(),
                delay,
                err
            );

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = &mut cancel => {
                    debug!("{} cancelled while waiting to retry", op);
                    return Err(StorageError::Cancelled { op, attempts: attempt });
                }
            }
        }
    }
}
