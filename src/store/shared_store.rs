use std::time::Duration;

use async_trait::async_trait;

use crate::FusewireError;

/// A key-value store shared by every process coordinating on the same keys.
///
/// The contract is deliberately minimal: `get` and `set` of raw bytes, with
/// no multi-key transactions, no pipelining, and no compare-and-swap. Any
/// read-modify-write built on top is two independent calls.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read the raw value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FusewireError>;

    /// Store `value` under `key`, expiring it after `ttl` if the store
    /// supports expiry. Stores without expiry may ignore `ttl`.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), FusewireError>;
}
