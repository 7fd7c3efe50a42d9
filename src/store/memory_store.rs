use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{FusewireError, SharedStore};

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

/// An in-process [`SharedStore`] over a concurrent map.
///
/// State is scoped to the current process: breakers and limiters backed by a
/// `MemoryStore` coordinate across tasks and threads, but not across
/// processes. TTLs are honored with lazy expiry: an expired entry is
/// removed the next time it is read.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FusewireError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };

        if let Some(deadline) = entry.expires_at
            && Instant::now() >= deadline
        {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }

        Ok(Some(entry.bytes.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), FusewireError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at,
            },
        );

        Ok(())
    }
}
