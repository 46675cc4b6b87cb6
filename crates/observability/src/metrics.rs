//! Access-control metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder every
//! call is a no-op, which is what tests get.

use std::time::Instant;

/// Cache hit/miss per permission sub-query kind (`kind`, `status` labels).
pub const PERMISSIONS_CACHE_USAGE: &str = "warden_access_permissions_cache_usage_total";

/// Cache hit/miss of the single-user search path (`status` label).
pub const SEARCH_USER_PERMISSIONS_CACHE_USAGE: &str =
    "warden_access_search_user_permissions_cache_usage_total";

/// Duration of a full permission resolution.
pub const PERMISSIONS_DURATION: &str = "warden_access_permissions_duration_seconds";

/// Duration of a bulk permission search.
pub const SEARCH_PERMISSIONS_DURATION: &str = "warden_access_search_permissions_duration_seconds";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

pub fn record_cache_usage(kind: &'static str, status: CacheStatus) {
    ::metrics::counter!(PERMISSIONS_CACHE_USAGE, "kind" => kind, "status" => status.as_str())
        .increment(1);
}

pub fn record_search_user_cache_usage(status: CacheStatus) {
    ::metrics::counter!(SEARCH_USER_PERMISSIONS_CACHE_USAGE, "status" => status.as_str())
        .increment(1);
}

/// Records elapsed seconds into a histogram when dropped.
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    started: Instant,
}

impl Timer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        ::metrics::histogram!(self.name).record(self.started.elapsed().as_secs_f64());
    }
}
