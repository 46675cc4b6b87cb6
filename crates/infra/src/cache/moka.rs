use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use warden_auth::{CacheKey, Permission};

use super::{CacheError, PermissionCache};

#[derive(Clone)]
struct Entry {
    permissions: Arc<Vec<Permission>>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<CacheKey, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process permission cache backed by `moka`.
#[derive(Clone)]
pub struct MokaPermissionCache {
    inner: Cache<CacheKey, Entry>,
}

impl MokaPermissionCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl std::fmt::Debug for MokaPermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaPermissionCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[async_trait]
impl PermissionCache for MokaPermissionCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Permission>>, CacheError> {
        Ok(self
            .inner
            .get(key)
            .await
            .map(|entry| entry.permissions.as_ref().clone()))
    }

    async fn set(
        &self,
        key: CacheKey,
        permissions: Vec<Permission>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            permissions: Arc::new(permissions),
            ttl,
        };
        self.inner.insert(key, entry).await;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}
