//! The shared-state seam between in-process coordination and cross-process
//! consistency.
//!
//! Every process pointing a breaker or limiter at the same key coordinates
//! exclusively through a [`SharedStore`]: a plain key-value service exposing
//! `get` and `set` of raw bytes. There are no multi-key transactions and no
//! compare-and-swap, so every read-modify-write is two independent round
//! trips and concurrent updates from different processes may race. The
//! primitives built on top treat this as a best-effort, eventually-accurate
//! substrate; see the crate docs for the consistency discussion.
//!
//! [`SharedState`] is the typed binding over one key: it owns the codec
//! (JSON via serde), the default value for absent keys, and the optional TTL
//! applied to writes.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: in-process, `DashMap`-backed, TTL honored with lazy
//!   expiry. No cross-process coordination, useful for single-process
//!   deployments and tests.
//! - [`RedisStore`] (feature `redis`): `GET`/`SET` against a shared Redis.
//!
//! Implement [`SharedStore`] yourself to target another store, or to layer
//! native atomic primitives (e.g. an atomic decrement-with-floor) behind the
//! same interface for stronger guarantees.

mod shared_store;
pub use shared_store::*;

mod shared_state;
pub use shared_state::*;

mod memory_store;
pub use memory_store::*;

#[cfg(feature = "redis")]
mod redis_store;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub use redis_store::*;
