//! Permission store boundary.
//!
//! The store owns persisted grants (user, team and basic role assignments of
//! stored roles). The service reads through it and never writes grants other
//! than the pass-through deletes and external service roles.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryPermissionStore;
pub use r#trait::{
    PermissionStore, SaveExternalServiceRoleCommand, UserPermissionsQuery,
    external_service_role_name,
};
