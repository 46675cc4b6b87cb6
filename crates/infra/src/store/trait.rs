use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use warden_auth::roles::{EXTERNAL_SERVICE_ROLE_PREFIX, slugify};
use warden_auth::{BasicRole, Permission, SearchOptions};
use warden_core::{AccessError, AccessResult, OrgId, StoreError, TeamId, UserId};

/// Filter for permission lookups.
///
/// Only assignments matching one of the populated fields are considered, and
/// only roles whose name starts with one of `role_prefixes` (all roles when
/// empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPermissionsQuery {
    pub org_id: OrgId,
    pub user_id: Option<UserId>,
    pub roles: Vec<BasicRole>,
    pub team_ids: Vec<TeamId>,
    pub role_prefixes: Vec<String>,
}

impl UserPermissionsQuery {
    pub fn new(org_id: OrgId) -> Self {
        Self {
            org_id,
            user_id: None,
            roles: Vec::new(),
            team_ids: Vec::new(),
            role_prefixes: Vec::new(),
        }
    }

    pub fn user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn roles(mut self, roles: Vec<BasicRole>) -> Self {
        self.roles = roles;
        self
    }

    pub fn teams(mut self, team_ids: Vec<TeamId>) -> Self {
        self.team_ids = team_ids;
        self
    }

    pub fn role_prefixes(mut self, prefixes: &[&str]) -> Self {
        self.role_prefixes = prefixes.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// Request to persist the role of an external service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveExternalServiceRoleCommand {
    pub external_service_id: String,
    /// Organization the service account acts in.
    pub assignment_org_id: OrgId,
    pub service_account_id: UserId,
    pub permissions: Vec<Permission>,
}

impl SaveExternalServiceRoleCommand {
    /// Normalize and check the command.
    ///
    /// The service id is slugified and duplicate permissions are dropped.
    pub fn validate(&mut self) -> AccessResult<()> {
        if self.external_service_id.trim().is_empty() {
            return Err(AccessError::validation("external service id not specified"));
        }
        self.external_service_id = slugify(&self.external_service_id);

        if self.permissions.is_empty() {
            return Err(AccessError::validation("no permissions provided"));
        }
        let mut dedup: Vec<Permission> = Vec::with_capacity(self.permissions.len());
        for p in self.permissions.drain(..) {
            if p.action.is_empty() {
                return Err(AccessError::validation(format!(
                    "external service {} requests a permission with no action",
                    self.external_service_id
                )));
            }
            if !dedup.contains(&p) {
                dedup.push(p);
            }
        }
        self.permissions = dedup;

        if self.service_account_id.get() <= 0 {
            return Err(AccessError::validation(format!(
                "invalid service account id {}",
                self.service_account_id
            )));
        }
        Ok(())
    }

    /// Name of the stored role (`extsvc:<slug>:permissions`).
    pub fn role_name(&self) -> String {
        external_service_role_name(&self.external_service_id)
    }
}

pub fn external_service_role_name(slug: &str) -> String {
    format!("{EXTERNAL_SERVICE_ROLE_PREFIX}{slug}:permissions")
}

/// Persistent grant storage, keyed by organization.
///
/// The store is the single source of truth; the engine only reads through it
/// (plus the pass-through deletes). Implementations must:
/// - never return data from another organization, except grants stored in
///   the global organization which apply everywhere
/// - honor `role_prefixes` filters
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Permissions from roles assigned to the query's user, teams and basic roles.
    async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<Vec<Permission>, StoreError>;

    /// Permissions from roles assigned to the query's basic roles.
    async fn get_basic_roles_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<Vec<Permission>, StoreError>;

    /// Permissions per team for the query's team ids.
    ///
    /// Teams without permissions may be absent from the map.
    async fn get_teams_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<HashMap<TeamId, Vec<Permission>>, StoreError>;

    /// Basic roles per user in the organization, optionally limited to `user_ids`.
    async fn get_users_basic_roles(
        &self,
        user_ids: Option<&[UserId]>,
        org_id: OrgId,
    ) -> Result<HashMap<UserId, Vec<BasicRole>>, StoreError>;

    /// Stored permissions per user matching the search predicate.
    async fn search_users_permissions(
        &self,
        org_id: OrgId,
        options: &SearchOptions,
    ) -> Result<HashMap<UserId, Vec<Permission>>, StoreError>;

    async fn delete_user_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<(), StoreError>;

    async fn delete_team_permissions(
        &self,
        org_id: OrgId,
        team_id: TeamId,
    ) -> Result<(), StoreError>;

    /// Create or replace an external service role and assign it.
    async fn save_external_service_role(
        &self,
        cmd: &SaveExternalServiceRoleCommand,
    ) -> Result<(), StoreError>;

    /// Remove the role of an external service (by slug) and its assignments.
    async fn delete_external_service_role(
        &self,
        external_service_id: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> PermissionStore for Arc<S>
where
    S: PermissionStore + ?Sized,
{
    async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<Vec<Permission>, StoreError> {
        (**self).get_user_permissions(query).await
    }

    async fn get_basic_roles_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<Vec<Permission>, StoreError> {
        (**self).get_basic_roles_permissions(query).await
    }

    async fn get_teams_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<HashMap<TeamId, Vec<Permission>>, StoreError> {
        (**self).get_teams_permissions(query).await
    }

    async fn get_users_basic_roles(
        &self,
        user_ids: Option<&[UserId]>,
        org_id: OrgId,
    ) -> Result<HashMap<UserId, Vec<BasicRole>>, StoreError> {
        (**self).get_users_basic_roles(user_ids, org_id).await
    }

    async fn search_users_permissions(
        &self,
        org_id: OrgId,
        options: &SearchOptions,
    ) -> Result<HashMap<UserId, Vec<Permission>>, StoreError> {
        (**self).search_users_permissions(org_id, options).await
    }

    async fn delete_user_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        (**self).delete_user_permissions(org_id, user_id).await
    }

    async fn delete_team_permissions(
        &self,
        org_id: OrgId,
        team_id: TeamId,
    ) -> Result<(), StoreError> {
        (**self).delete_team_permissions(org_id, team_id).await
    }

    async fn save_external_service_role(
        &self,
        cmd: &SaveExternalServiceRoleCommand,
    ) -> Result<(), StoreError> {
        (**self).save_external_service_role(cmd).await
    }

    async fn delete_external_service_role(
        &self,
        external_service_id: &str,
    ) -> Result<(), StoreError> {
        (**self).delete_external_service_role(external_service_id).await
    }
}
