use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::{RateLimitExceeded, TokenBucket, common::TaskGuard};

/// A pending call waiting for a rate-limiter slot.
///
/// Owned by the enqueuing caller until it is either dequeued and dispatched
/// or cancelled.
struct AdmissionEntry {
    cancelled: Arc<AtomicBool>,
    start_tx: oneshot::Sender<()>,
    done_rx: oneshot::Receiver<()>,
}

/// Signals `done` exactly once: without the cancellation flag on normal
/// completion, with it when the caller's future is dropped first.
struct CompletionGuard {
    cancelled: Arc<AtomicBool>,
    done_tx: Option<oneshot::Sender<()>>,
}

impl CompletionGuard {
    fn new(cancelled: Arc<AtomicBool>, done_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancelled,
            done_tx: Some(done_tx),
        }
    }

    fn complete(&mut self) {
        if let Some(done_tx) = self.done_tx.take() {
            let _ = done_tx.send(());
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(done_tx) = self.done_tx.take() {
            self.cancelled.store(true, Ordering::Release);
            let _ = done_tx.send(());
        }
    }
}

/// A rate limiter that delays calls instead of dropping them.
///
/// Callers enqueue into a bounded admission queue; a background consumer
/// dequeues them in order and dispatches each under a concurrency cap. Once
/// dispatched, a call takes a token from the [`TokenBucket`], waiting out
/// the bucket interval and retrying for as long as the bucket is empty, then
/// runs. [`RateLimitExceeded`] never surfaces to callers.
///
/// # Cancellation
///
/// Dropping the future returned by [`apply`](Self::apply) cancels the call.
/// Cancelling while still queued is free: the entry is skipped without
/// consuming a token and without delaying other queued calls. Cancelling
/// after dispatch drops the wrapped task, and the concurrency slot is freed
/// once that unwind completes.
///
/// # Concurrency
///
/// The limiter runs one background consumer task for its lifetime, torn
/// down when the limiter is dropped. [`make`](Self::make) must therefore be
/// called from within a Tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use fusewire::{IntervalSeconds, MaxRequests, MemoryStore, RateLimiter, SharedStore, StateKey, TokenBucket};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
///
/// let bucket = TokenBucket::new(
///     store,
///     StateKey::try_from("search-api").unwrap(),
///     MaxRequests::try_from(10).unwrap(),
///     IntervalSeconds::try_from(1).unwrap(),
///     None,
/// );
/// let limiter = RateLimiter::make(bucket, None);
///
/// let body = limiter.apply(async { "results" }).await;
/// # }
/// ```
pub struct RateLimiter {
    bucket: TokenBucket,
    queue_tx: mpsc::Sender<AdmissionEntry>,
    _consumer: TaskGuard,
}

impl RateLimiter {
    /// Create a limiter over `bucket`.
    ///
    /// `limiter_parallelism` caps how many dispatched calls may be between
    /// admission and completion at once (`None`: unbounded). The admission
    /// queue is sized to the bucket's budget rounded up to a power of two,
    /// so a full burst can be queued without blocking producers.
    ///
    /// Must be called from within a Tokio runtime: the limiter spawns its
    /// queue consumer here.
    pub fn make(bucket: TokenBucket, limiter_parallelism: Option<NonZeroUsize>) -> Self {
        let capacity = (*bucket.max_requests()).next_power_of_two();
        let capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);

        let permits = limiter_parallelism
            .map(NonZeroUsize::get)
            .unwrap_or(Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));

        let consumer = tokio::spawn(run_admission_loop(queue_rx, semaphore));

        Self {
            bucket,
            queue_tx,
            _consumer: TaskGuard::new(consumer),
        }
    }

    /// The underlying token bucket.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Run `task` once a rate-limit slot is available.
    ///
    /// Admission may delay execution arbitrarily long, but the call is never
    /// dropped: the limiter waits out as many bucket intervals as it takes.
    /// See the type-level docs for cancellation semantics.
    pub async fn apply<F: Future>(&self, task: F) -> F::Output {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (start_tx, start_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let mut completion = CompletionGuard::new(cancelled.clone(), done_tx);
        // Re-homed after the guard: a cancelled caller must drop the task
        // before the guard signals done and frees the slot.
        let task = async move { task.await };

        let entry = AdmissionEntry {
            cancelled,
            start_tx,
            done_rx,
        };

        let _ = self.queue_tx.send(entry).await;
        let _ = start_rx.await;

        loop {
            match self.bucket.allow().await {
                Ok(_) => break,
                Err(RateLimitExceeded) => {
                    tokio::time::sleep(Duration::from_secs(*self.bucket.interval())).await;
                }
            }
        }

        let output = task.await;
        completion.complete();

        output
    } // end method apply
}

/// Drains the admission queue: entries cancelled while queued are skipped
/// outright; everything else is dispatched under a semaphore permit that is
/// held until the caller signals done.
async fn run_admission_loop(
    mut queue_rx: mpsc::Receiver<AdmissionEntry>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(entry) = queue_rx.recv().await {
        if entry.cancelled.load(Ordering::Acquire) {
            continue;
        }

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            return;
        };

        let AdmissionEntry {
            start_tx, done_rx, ..
        } = entry;

        tokio::spawn(async move {
            let _permit = permit;

            // A send failure means the caller went away between dequeue and
            // dispatch; nothing was started and no token was taken.
            if start_tx.send(()).is_err() {
                return;
            }

            let _ = done_rx.await;
        });
    }
}
