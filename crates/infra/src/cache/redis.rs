use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

use warden_auth::{CacheKey, Permission};

use super::{CacheError, PermissionCache};

/// Shared permission cache in Redis.
///
/// Slices are stored as JSON under the key's display form. Redis TTLs have
/// one-second granularity, so shorter TTLs are rounded up.
#[derive(Clone)]
pub struct RedisPermissionCache {
    conn: MultiplexedConnection,
}

impl RedisPermissionCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self { conn })
    }
}

fn unavailable(err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

#[async_trait]
impl PermissionCache for RedisPermissionCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Permission>>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.to_string()).await.map_err(unavailable)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: CacheKey,
        permissions: Vec<Permission>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(&permissions)?;
        let secs = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key.to_string(), json, secs)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key.to_string()).await.map_err(unavailable)?;
        Ok(())
    }
}
