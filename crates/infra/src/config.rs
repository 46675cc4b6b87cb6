//! Access-control configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_CACHE_CAPACITY: u64 = 100_000;

/// Runtime settings of the access-control service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccessControlConfig {
    /// Resolve through the permission cache (otherwise always recompute).
    pub permission_cache: bool,
    /// Lifetime of every cached permission slice.
    pub cache_ttl_secs: u64,
    /// Upper bound on cached slices held in process.
    pub cache_capacity: u64,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            permission_cache: true,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl AccessControlConfig {
    /// Read settings from `WARDEN_RBAC_*` environment variables.
    ///
    /// Missing or malformed values fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            permission_cache: env_or("WARDEN_RBAC_PERMISSION_CACHE", defaults.permission_cache),
            cache_ttl_secs: env_or("WARDEN_RBAC_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            cache_capacity: env_or("WARDEN_RBAC_CACHE_CAPACITY", defaults.cache_capacity),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn uncached() -> Self {
        Self {
            permission_cache: false,
            ..Self::default()
        }
    }
}

fn env_or<T: FromStr + Copy + core::fmt::Debug>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                variable = name,
                value = %raw,
                ?default,
                "malformed setting; using default"
            );
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AccessControlConfig::default();
        assert!(cfg.permission_cache);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(60));
        assert!(!AccessControlConfig::uncached().permission_cache);
    }

    #[test]
    fn deserializes_partial_settings() {
        let cfg: AccessControlConfig =
            serde_json::from_str(r#"{ "permission_cache": false, "cache_ttl_secs": 5 }"#).unwrap();
        assert!(!cfg.permission_cache);
        assert_eq!(cfg.cache_ttl_secs, 5);
        assert_eq!(cfg.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn malformed_env_value_falls_back() {
        assert_eq!(env_or("WARDEN_TEST_UNSET_VARIABLE", 7u64), 7);
    }
}
