use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{FusewireError, SharedStore};

/// A [`SharedStore`] backed by Redis.
///
/// Uses plain `GET`/`SET` (`SET .. EX` when a TTL is given); no scripts and
/// no transactions, per the store contract. The [`ConnectionManager`]
/// handles pooling and reconnection and is cloned per operation.
///
/// # Examples
///
/// ```ignore
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let connection_manager = client.get_connection_manager().await?;
/// let store: Arc<dyn SharedStore> = Arc::new(RedisStore::new(connection_manager));
/// ```
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
}

impl RedisStore {
    /// Create a store over an established connection manager.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FusewireError> {
        let mut connection_manager = self.connection_manager.clone();
        let value: Option<Vec<u8>> = connection_manager.get(key).await?;

        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), FusewireError> {
        let mut connection_manager = self.connection_manager.clone();

        match ttl {
            // EX takes whole seconds and rejects 0
            Some(ttl) => {
                let _: () = connection_manager
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await?;
            }
            None => {
                let _: () = connection_manager.set(key, value).await?;
            }
        }

        Ok(())
    }
}
