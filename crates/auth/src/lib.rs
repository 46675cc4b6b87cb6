//! `warden-auth`: pure access-control model (no IO).
//!
//! Permissions, roles, principals, search predicates, cache keys and the
//! process-wide role registry. Storage and caching live in `warden-infra`.

pub mod authorize;
pub mod cache_key;
pub mod permissions;
pub mod principal;
pub mod registry;
pub mod roles;
pub mod search;

pub use authorize::{AuthzError, authorize};
pub use cache_key::CacheKey;
pub use permissions::{Permission, group_scopes_by_action};
pub use principal::{Namespace, NamespacedId, Principal};
pub use registry::RoleRegistry;
pub use roles::{BasicRole, ExtensionRole, ExtensionRoleRegistration, Role, RoleRegistration};
pub use search::{SearchOptions, permission_matches_search_options};
