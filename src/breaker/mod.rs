//! Distributed circuit breaker.
//!
//! The breaker wraps calls to a downstream resource and fails them fast once
//! the resource is judged unhealthy, coordinating that judgement across
//! processes through the shared store.
//!
//! # States
//!
//! - **Closed**: normal operation, calls pass through and their outcomes feed
//!   the tripping strategy.
//! - **Open**: the downstream is assumed down; calls fail immediately with
//!   [`CircuitBreakerError::Open`](crate::CircuitBreakerError::Open) and the
//!   wrapped effect never runs.
//! - **HalfOpen**: after a reset delay, a single probe call is let through to
//!   test recovery; everyone else still fails fast.
//!
//! The reset delay follows a [`Backoff`] schedule: each consecutive failed
//! probe pushes the next attempt further out, and a successful probe restarts
//! the schedule from its initial delay.

mod backoff;
pub use backoff::*;

mod circuit_breaker;
pub use circuit_breaker::*;

mod tripping_strategy;
pub use tripping_strategy::*;
