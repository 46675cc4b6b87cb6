//! Feature toggle boundary.
//!
//! Flags are evaluated on every call; the engine never caches a result.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Flag names consulted by the access-control service.
pub mod flags {
    /// Grants the shared-with-me virtual folder read permission.
    pub const NESTED_FOLDERS: &str = "nestedFolders";
    /// Allows extensions to declare roles.
    pub const ACCESS_CONTROL_EXTENSION_ROLES: &str = "accessControlExtensionRoles";
    /// Allows external service roles to be saved and deleted.
    pub const EXTERNAL_SERVICE_ACCOUNTS: &str = "externalServiceAccounts";
}

pub trait FeatureToggles: Send + Sync {
    fn is_enabled(&self, flag: &str) -> bool;
}

impl<F> FeatureToggles for std::sync::Arc<F>
where
    F: FeatureToggles + ?Sized,
{
    fn is_enabled(&self, flag: &str) -> bool {
        (**self).is_enabled(flag)
    }
}

/// Set of enabled flags, adjustable at runtime.
#[derive(Debug, Default)]
pub struct StaticFeatureToggles {
    enabled: RwLock<HashSet<String>>,
}

impl StaticFeatureToggles {
    pub fn new(flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            enabled: RwLock::new(flags.into_iter().map(Into::into).collect()),
        }
    }

    /// Comma-separated flag list from `WARDEN_FEATURE_TOGGLES`.
    pub fn from_env() -> Self {
        let raw = std::env::var("WARDEN_FEATURE_TOGGLES").unwrap_or_default();
        Self::new(raw.split(',').map(str::trim).filter(|f| !f.is_empty()))
    }

    pub fn enable(&self, flag: impl Into<String>) {
        self.enabled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flag.into());
    }

    pub fn disable(&self, flag: &str) {
        self.enabled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(flag);
    }
}

impl FeatureToggles for StaticFeatureToggles {
    fn is_enabled(&self, flag: &str) -> bool {
        self.enabled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(flag)
    }
}
