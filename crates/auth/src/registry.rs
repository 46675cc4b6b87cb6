//! Process-wide registry of basic roles and declared role registrations.
//!
//! Basic roles only ever grow: declared registrations are replayed onto them
//! by [`RoleRegistry::register_fixed_roles`]. Replay is expected to happen
//! during startup, before traffic. Cached permission slices derived from basic
//! roles are not invalidated by a later replay; they converge once their TTL
//! elapses.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error};

use warden_core::{AccessError, AccessResult};

use crate::roles::{
    self, ExtensionRoleRegistration, basic_role_definitions, builtin_roles_with_parents,
    validate_builtin_roles, validate_extension_role, validate_fixed_role,
};
use crate::{BasicRole, Permission, Role, RoleRegistration};

#[derive(Debug)]
struct RegistryState {
    basic_roles: HashMap<BasicRole, Role>,
    registrations: Vec<RoleRegistration>,
    /// Registrations already replayed onto `basic_roles`.
    applied: usize,
}

/// Basic role definitions plus the append-only registration list.
///
/// Reads and the rare writes share one lock; no lock is ever held across an
/// await point because nothing in here is async.
#[derive(Debug)]
pub struct RoleRegistry {
    state: RwLock<RegistryState>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                basic_roles: basic_role_definitions(),
                registrations: Vec::new(),
                applied: 0,
            }),
        }
    }

    // Append-only state: a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and append fixed role registrations.
    ///
    /// The batch is all-or-nothing: one invalid registration rejects the whole
    /// call and leaves earlier declarations untouched.
    pub fn declare_fixed_roles(
        &self,
        registrations: impl IntoIterator<Item = RoleRegistration>,
    ) -> AccessResult<()> {
        let registrations: Vec<RoleRegistration> = registrations.into_iter().collect();
        for r in &registrations {
            validate_fixed_role(&r.role)?;
            validate_builtin_roles(&r.grants)?;
        }
        self.write().registrations.extend(registrations);
        Ok(())
    }

    /// Validate and append roles declared by an extension.
    ///
    /// Feature gating is the caller's concern.
    pub fn declare_extension_roles(
        &self,
        extension_id: &str,
        extension_name: &str,
        registrations: Vec<ExtensionRoleRegistration>,
    ) -> AccessResult<()> {
        if extension_id.is_empty() {
            return Err(AccessError::validation("extension id must not be empty"));
        }
        let registrations =
            roles::extension_role_registrations(extension_id, extension_name, registrations);
        for r in &registrations {
            validate_extension_role(extension_id, &r.role)?;
            validate_builtin_roles(&r.grants)?;
        }
        for r in &registrations {
            debug!(role = %r.role.name, extension = extension_id, "registering extension role");
        }
        self.write().registrations.extend(registrations);
        Ok(())
    }

    /// Replay pending registrations onto the basic roles they grant to.
    ///
    /// Grants propagate to every basic role inheriting from the target. Only
    /// registrations not yet replayed are applied, so calling this again after
    /// late declarations does not duplicate permissions. Unknown basic roles
    /// are logged and skipped.
    pub fn register_fixed_roles(&self) {
        let mut state = self.write();
        let RegistryState {
            basic_roles,
            registrations,
            applied,
        } = &mut *state;

        for registration in &registrations[*applied..] {
            for name in builtin_roles_with_parents(&registration.grants) {
                let Some(basic_role) = name
                    .parse::<BasicRole>()
                    .ok()
                    .and_then(|br| basic_roles.get_mut(&br))
                else {
                    error!(
                        built_in_role = %name,
                        role = %registration.role.name,
                        "unknown builtin role"
                    );
                    continue;
                };
                basic_role
                    .permissions
                    .extend(registration.role.permissions.iter().cloned());
            }
        }
        *applied = registrations.len();
    }

    /// Declared role by name.
    ///
    /// Basic roles are not addressable here and resolve to `NotFound`.
    pub fn get_role_by_name(&self, name: &str) -> AccessResult<Role> {
        let not_found = || AccessError::not_found(format!("role '{name}'"));
        let state = self.read();
        if state
            .basic_roles
            .iter()
            .any(|(br, role)| br.as_str() == name || role.name == name)
        {
            return Err(not_found());
        }
        state
            .registrations
            .iter()
            .find(|r| r.role.name == name)
            .map(|r| r.role.clone())
            .ok_or_else(not_found)
    }

    /// Snapshot of a basic role's in-memory permissions.
    pub fn basic_role_permissions(&self, role: BasicRole) -> Vec<Permission> {
        self.read()
            .basic_roles
            .get(&role)
            .map(|r| r.permissions.clone())
            .unwrap_or_default()
    }

    /// Per basic role, the in-memory permissions accepted by `filter`.
    ///
    /// Roles with no matching permission are omitted.
    pub fn filter_basic_role_permissions<F>(&self, filter: F) -> HashMap<BasicRole, Vec<Permission>>
    where
        F: Fn(&Permission) -> bool,
    {
        self.read()
            .basic_roles
            .iter()
            .filter_map(|(br, role)| {
                let matching: Vec<Permission> =
                    role.permissions.iter().filter(|p| filter(p)).cloned().collect();
                (!matching.is_empty()).then_some((*br, matching))
            })
            .collect()
    }

    pub fn registration_count(&self) -> usize {
        self.read().registrations.len()
    }
}
