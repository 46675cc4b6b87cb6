//! Access-control service: permission resolution, caching and search.
//!
//! The service owns no durable state. Grants live in the [`PermissionStore`],
//! resolved slices in the [`PermissionCache`] and basic role definitions in the
//! shared [`RoleRegistry`].

mod resolver;
mod search;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use warden_auth::{
    AuthzError, ExtensionRoleRegistration, Principal, Role, RoleRegistration, RoleRegistry,
    authorize,
};
use warden_core::{AccessResult, OrgId, TeamId, UserId};

use crate::cache::PermissionCache;
use crate::config::AccessControlConfig;
use crate::features::{FeatureToggles, flags};
use crate::store::{PermissionStore, SaveExternalServiceRoleCommand};

/// Per-call resolution options.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip cache reads; results are still written back.
    pub reload_cache: bool,
}

impl ResolveOptions {
    pub fn reload() -> Self {
        Self { reload_cache: true }
    }
}

pub struct AccessControlService<S, C> {
    config: AccessControlConfig,
    registry: Arc<RoleRegistry>,
    store: S,
    cache: C,
    features: Arc<dyn FeatureToggles>,
}

impl<S, C> AccessControlService<S, C>
where
    S: PermissionStore,
    C: PermissionCache,
{
    pub fn new(
        config: AccessControlConfig,
        registry: Arc<RoleRegistry>,
        store: S,
        cache: C,
        features: Arc<dyn FeatureToggles>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            cache,
            features,
        }
    }

    pub fn config(&self) -> &AccessControlConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Validate and append fixed role registrations (all or nothing).
    pub fn declare_fixed_roles(
        &self,
        registrations: impl IntoIterator<Item = RoleRegistration>,
    ) -> AccessResult<()> {
        self.registry.declare_fixed_roles(registrations)
    }

    /// Replay declared registrations onto the basic roles.
    ///
    /// Must run before traffic: cached basic role slices are not invalidated.
    pub fn register_fixed_roles(&self) {
        self.registry.register_fixed_roles();
    }

    /// Declare roles on behalf of an extension.
    ///
    /// A no-op unless extension roles are enabled.
    pub fn declare_extension_roles(
        &self,
        extension_id: &str,
        extension_name: &str,
        registrations: Vec<ExtensionRoleRegistration>,
    ) -> AccessResult<()> {
        if !self.features.is_enabled(flags::ACCESS_CONTROL_EXTENSION_ROLES) {
            debug!(extension = extension_id, "extension roles disabled; ignoring declaration");
            return Ok(());
        }
        self.registry
            .declare_extension_roles(extension_id, extension_name, registrations)
    }

    pub fn get_role_by_name(&self, _org_id: OrgId, name: &str) -> AccessResult<Role> {
        self.registry.get_role_by_name(name)
    }

    pub async fn delete_user_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> AccessResult<()> {
        Ok(self.store.delete_user_permissions(org_id, user_id).await?)
    }

    pub async fn delete_team_permissions(
        &self,
        org_id: OrgId,
        team_id: TeamId,
    ) -> AccessResult<()> {
        Ok(self.store.delete_team_permissions(org_id, team_id).await?)
    }

    /// Persist an external service role, replacing a previous one.
    pub async fn save_external_service_role(
        &self,
        mut cmd: SaveExternalServiceRoleCommand,
    ) -> AccessResult<()> {
        if !self.features.is_enabled(flags::EXTERNAL_SERVICE_ACCOUNTS) {
            debug!(
                external_service = %cmd.external_service_id,
                "external service accounts disabled; not saving role"
            );
            return Ok(());
        }
        cmd.validate()?;
        Ok(self.store.save_external_service_role(&cmd).await?)
    }

    pub async fn delete_external_service_role(
        &self,
        external_service_id: &str,
    ) -> AccessResult<()> {
        if !self.features.is_enabled(flags::EXTERNAL_SERVICE_ACCOUNTS) {
            debug!(
                external_service = external_service_id,
                "external service accounts disabled; not deleting role"
            );
            return Ok(());
        }
        let slug = warden_auth::roles::slugify(external_service_id);
        Ok(self.store.delete_external_service_role(&slug).await?)
    }

    /// Role synchronization is not supported here; always succeeds.
    pub async fn sync_user_roles(
        &self,
        _org_id: OrgId,
        _user_id: UserId,
        _roles: Vec<String>,
    ) -> AccessResult<()> {
        Ok(())
    }

    pub fn usage_stats(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([(
            "stats.oss.accesscontrol.enabled.count".to_string(),
            serde_json::Value::from(1),
        )])
    }

    /// Resolve the principal's permissions and check `action` (optionally on `scope`).
    pub async fn evaluate(
        &self,
        principal: &Principal,
        action: &str,
        scope: Option<&str>,
    ) -> AccessResult<Result<(), AuthzError>> {
        let permissions = self
            .get_user_permissions(principal, ResolveOptions::default())
            .await?;
        Ok(authorize(&permissions, action, scope))
    }
}
