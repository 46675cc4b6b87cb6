//! Infrastructure layer: permission store, cache, feature toggles, config,
//! and the access-control service that ties them to the role registry.

pub mod cache;
pub mod config;
pub mod features;
pub mod service;
pub mod store;

pub use cache::{CacheError, MokaPermissionCache, PermissionCache};
#[cfg(feature = "redis")]
pub use cache::RedisPermissionCache;
pub use config::AccessControlConfig;
pub use features::{FeatureToggles, StaticFeatureToggles, flags};
pub use service::{AccessControlService, ResolveOptions};
pub use store::{
    InMemoryPermissionStore, PermissionStore, SaveExternalServiceRoleCommand, UserPermissionsQuery,
};
