use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{FusewireError, SharedStore};

/// A typed binding to one value in the shared store.
///
/// A `SharedState` couples a key with a default value and a codec: `get`
/// returns the stored value or the default when the key is absent, `set`
/// writes a value, and [`get_and_update`](Self::get_and_update) reads,
/// applies a function, writes the result back, and returns the pre-update
/// value. Values are encoded as JSON.
///
/// The binding is owned by whichever breaker or limiter created it, but the
/// key is physically shared by every process using the same store; this is
/// the cross-process coordination point.
///
/// # Consistency
///
/// `get_and_update` is **not** atomic: the read and the write are separate
/// store round trips, and a concurrent update from another process between
/// the two is lost. Callers of this crate get best-effort, eventually
/// accurate coordination; see the crate docs.
///
/// # Store failures
///
/// Store and codec failures are unrecoverable defects: the operation logs
/// and panics rather than retrying, because retrying a non-transactional
/// read-modify-write risks double-applying it.
#[derive(Clone)]
pub struct SharedState<T> {
    key: Arc<str>,
    default_value: T,
    ttl: Option<Duration>,
    store: Arc<dyn SharedStore>,
}

impl<T> SharedState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Bind `key` in `store` with `default_value` for absent reads.
    ///
    /// When `ttl` is set it is applied to every write.
    pub fn new(
        key: impl Into<String>,
        default_value: T,
        store: Arc<dyn SharedStore>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            key: Arc::from(key.into()),
            default_value,
            ttl,
            store,
        }
    }

    /// The bound store key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the current value, or the default when the key is absent.
    pub async fn get(&self) -> T {
        let bytes = match self.store.get(&self.key).await {
            Ok(bytes) => bytes,
            Err(err) => die(&self.key, "read", &err),
        };

        match bytes {
            None => self.default_value.clone(),
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(err) => die(&self.key, "decode", &FusewireError::Codec(err)),
            },
        }
    }

    /// Write `value`.
    pub async fn set(&self, value: T) {
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(err) => die(&self.key, "encode", &FusewireError::Codec(err)),
        };

        if let Err(err) = self.store.set(&self.key, bytes, self.ttl).await {
            die(&self.key, "write", &err);
        }
    }

    /// Read the current value, write `update(current)` back, and return the
    /// value observed **before** the update.
    ///
    /// The read and write are independent round trips; see the type-level
    /// consistency note.
    pub async fn get_and_update(&self, update: impl FnOnce(T) -> T) -> T {
        let current = self.get().await;
        self.set(update(current.clone())).await;
        current
    }
}

fn die(key: &str, operation: &str, err: &FusewireError) -> ! {
    tracing::error!(key, operation, error = %err, "shared store operation failed");
    panic!("shared store {operation} for key {key:?} failed: {err}");
}
