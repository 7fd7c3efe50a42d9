use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{IntervalSeconds, MaxRequests, RateLimitExceeded, SharedState, SharedStore, StateKey};

/// A fixed-window token bucket over shared counters.
///
/// The bucket tracks a budget of `max_requests` calls per interval in two
/// store entries shared across processes: `"bucket:<key>"` holds the
/// remaining tokens and `"request:<key>"` the epoch second of the last
/// refill. Each [`allow`](Self::allow) call performs exactly one refill
/// boundary check against the wall clock, with whole-second granularity.
///
/// # Consistency
///
/// Reads and writes against the store are independent round trips, so
/// concurrent callers across processes can race on the same window and
/// briefly over- or under-admit. The bucket is best-effort, eventually
/// accurate; see the crate docs.
pub struct TokenBucket {
    bucket: SharedState<u64>,
    last_refill: SharedState<Option<u64>>,
    max_requests: MaxRequests,
    interval: IntervalSeconds,
}

impl TokenBucket {
    /// Create a bucket admitting `max_requests` calls per `interval`.
    ///
    /// When `ttl` is set it is applied to every counter write, letting the
    /// store expire counters for keys that stop being used.
    pub fn new(
        store: Arc<dyn SharedStore>,
        key: StateKey,
        max_requests: MaxRequests,
        interval: IntervalSeconds,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            bucket: SharedState::new(format!("bucket:{key}"), *max_requests, store.clone(), ttl),
            last_refill: SharedState::new(format!("request:{key}"), None, store, ttl),
            max_requests,
            interval,
        }
    }

    /// Take one token, returning the count observed **before** this call.
    ///
    /// - When the interval has elapsed since the last refill, the bucket
    ///   refills to `max_requests - 1` (this call consumes the first token
    ///   of the new window) and the pre-refill count is returned.
    /// - When tokens remain, the bucket is decremented and the pre-decrement
    ///   count is returned.
    /// - When the bucket is empty, the call fails with
    ///   [`RateLimitExceeded`] and nothing is written.
    ///
    /// The first call for a key stamps the window start into the store.
    pub async fn allow(&self) -> Result<u64, RateLimitExceeded> {
        let now = epoch_seconds();

        let last_refill = match self.last_refill.get().await {
            Some(stamp) => stamp,
            None => {
                self.last_refill.set(Some(now)).await;
                now
            }
        };

        let remaining = self.bucket.get().await;

        if now.saturating_sub(last_refill) >= *self.interval {
            self.bucket.set(*self.max_requests - 1).await;
            self.last_refill.set(Some(now)).await;
            Ok(remaining)
        } else if remaining == 0 {
            Err(RateLimitExceeded)
        } else {
            Ok(self
                .bucket
                .get_and_update(|count| count.saturating_sub(1))
                .await)
        }
    } // end method allow

    /// The configured token budget per interval.
    pub fn max_requests(&self) -> MaxRequests {
        self.max_requests
    }

    /// The configured refill interval.
    pub fn interval(&self) -> IntervalSeconds {
        self.interval
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
