//! Distributed rate limiting.
//!
//! [`TokenBucket`] is the admission algorithm: a replenishing budget of
//! calls per fixed interval, tracked in counters shared across processes.
//! [`RateLimiter`] is the front-end that turns "check if allowed" into
//! "wait until allowed, then run, with cancellation": callers queue up,
//! are admitted in order, and are delayed (never dropped) while the
//! bucket is empty.

mod rate_limiter;
pub use rate_limiter::*;

mod token_bucket;
pub use token_bucket::*;
