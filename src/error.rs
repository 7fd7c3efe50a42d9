/// Error type for this crate.
///
/// Covers store access, value codec, and input validation failures. The
/// call-level outcomes of the two primitives have their own types:
/// [`CircuitBreakerError`] and [`RateLimitExceeded`].
#[derive(Debug, thiserror::Error)]
pub enum FusewireError {
    /// State key failed validation.
    #[error("invalid state key: {0}")]
    InvalidStateKey(String),

    /// Max requests failed validation.
    #[error("invalid max requests: {0}")]
    InvalidMaxRequests(String),

    /// Interval failed validation.
    #[error("invalid interval: {0}")]
    InvalidIntervalSeconds(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A custom store implementation failed.
    #[error("store error: {0}")]
    Store(String),

    /// Redis error.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of a [`CircuitBreaker::apply`](crate::CircuitBreaker::apply) call
/// that did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The call was rejected without invoking the wrapped effect: the breaker
    /// is Open, or the caller lost the half-open probe race.
    #[error("circuit breaker is open")]
    Open,

    /// The wrapped effect ran and failed with the underlying error, whether
    /// or not the failure classifier counted it.
    #[error("wrapped call failed: {0}")]
    Wrapped(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether this is a rejection (the wrapped effect never ran).
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// The underlying error, if the wrapped effect ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open => None,
            Self::Wrapped(err) => Some(err),
        }
    }
}

/// The token bucket has no tokens left in the current interval.
///
/// Surfaced by [`TokenBucket::allow`](crate::TokenBucket::allow). Callers
/// going through [`RateLimiter::apply`](crate::RateLimiter::apply) never see
/// it: the limiter absorbs it by waiting out the interval and retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded")]
pub struct RateLimitExceeded;
