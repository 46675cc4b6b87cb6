//! Permission cache boundary.
//!
//! Values are whole permission slices addressed by [`CacheKey`]. Every entry
//! carries its own TTL; the service treats any cache error as a miss.

pub mod moka;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use warden_auth::{CacheKey, Permission};

pub use self::moka::MokaPermissionCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisPermissionCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value store for permission slices.
///
/// Implementations must be safe to share across tasks; concurrent writers of
/// the same key may race, last write wins.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Permission>>, CacheError>;

    async fn set(
        &self,
        key: CacheKey,
        permissions: Vec<Permission>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;
}

#[async_trait]
impl<C> PermissionCache for Arc<C>
where
    C: PermissionCache + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Permission>>, CacheError> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: CacheKey,
        permissions: Vec<Permission>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        (**self).set(key, permissions, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}
