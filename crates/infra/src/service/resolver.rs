use std::collections::HashMap;
use std::future::Future;

use tracing::{instrument, warn};

use warden_auth::roles::OSS_ROLE_PREFIXES;
use warden_auth::{BasicRole, CacheKey, Permission, Principal};
use warden_core::{AccessResult, OrgId, TeamId};
use warden_observability::metrics::{self, CacheStatus, Timer};

use crate::cache::PermissionCache;
use crate::features::flags;
use crate::store::{PermissionStore, UserPermissionsQuery};

use super::{AccessControlService, ResolveOptions};

const TEAM_KIND: &str = "team";

impl<S, C> AccessControlService<S, C>
where
    S: PermissionStore,
    C: PermissionCache,
{
    /// Every permission the principal holds in its organization.
    ///
    /// Cached and uncached resolution return the same multiset. Principals
    /// without a unique id (anonymous, render) always take the uncached path.
    #[instrument(
        name = "authz.get_user_permissions",
        skip_all,
        fields(org_id = %principal.org_id, identity = %principal.namespaced_id),
        err
    )]
    pub async fn get_user_permissions(
        &self,
        principal: &Principal,
        options: ResolveOptions,
    ) -> AccessResult<Vec<Permission>> {
        let _timer = Timer::start(metrics::PERMISSIONS_DURATION);

        if !self.config.permission_cache || !principal.has_unique_id() {
            return self.uncached_user_permissions(principal).await;
        }
        self.cached_user_permissions(principal, options).await
    }

    /// Drop the principal's aggregate and direct slices.
    pub async fn clear_user_permission_cache(&self, principal: &Principal) {
        for key in [CacheKey::user_search(principal), CacheKey::user_direct(principal)] {
            if let Err(err) = self.cache.delete(&key).await {
                warn!(key = %key, error = %err, "failed to evict permission cache entry");
            }
        }
    }

    async fn uncached_user_permissions(
        &self,
        principal: &Principal,
    ) -> AccessResult<Vec<Permission>> {
        let roles = principal.basic_roles();
        let mut permissions: Vec<Permission> = roles
            .iter()
            .flat_map(|role| self.registry.basic_role_permissions(*role))
            .collect();

        if self.features.is_enabled(flags::NESTED_FOLDERS) {
            permissions.push(Permission::shared_with_me_folder());
        }

        let query = UserPermissionsQuery::new(principal.org_id)
            .user(principal.user_id()?)
            .roles(roles)
            .teams(principal.team_ids.clone())
            .role_prefixes(&OSS_ROLE_PREFIXES);
        permissions.extend(self.store.get_user_permissions(&query).await?);
        Ok(permissions)
    }

    async fn cached_user_permissions(
        &self,
        principal: &Principal,
        options: ResolveOptions,
    ) -> AccessResult<Vec<Permission>> {
        let (basic, teams, direct) = tokio::try_join!(
            self.cached_basic_roles_permissions(principal, options),
            self.cached_teams_permissions(principal, options),
            self.cached_user_direct_permissions(principal, options),
        )?;

        let mut permissions = Vec::with_capacity(basic.len() + teams.len() + direct.len());
        permissions.extend(basic);
        permissions.extend(teams);
        permissions.extend(direct);
        Ok(permissions)
    }

    #[instrument(name = "authz.cached_basic_roles_permissions", skip_all)]
    async fn cached_basic_roles_permissions(
        &self,
        principal: &Principal,
        options: ResolveOptions,
    ) -> AccessResult<Vec<Permission>> {
        let mut permissions = Vec::new();
        for role in principal.basic_roles() {
            let key = CacheKey::basic_role(role, principal.org_id);
            let slice = self
                .cached_permissions(key, options, || {
                    self.basic_role_permissions(role, principal.org_id)
                })
                .await?;
            permissions.extend(slice);
        }
        Ok(permissions)
    }

    /// In-memory permissions of the role plus the stored ones assigned to it.
    async fn basic_role_permissions(
        &self,
        role: BasicRole,
        org_id: OrgId,
    ) -> AccessResult<Vec<Permission>> {
        let mut permissions = self.registry.basic_role_permissions(role);
        let query = UserPermissionsQuery::new(org_id)
            .roles(vec![role])
            .role_prefixes(&OSS_ROLE_PREFIXES);
        permissions.extend(self.store.get_basic_roles_permissions(&query).await?);
        Ok(permissions)
    }

    #[instrument(name = "authz.cached_user_direct_permissions", skip_all)]
    async fn cached_user_direct_permissions(
        &self,
        principal: &Principal,
        options: ResolveOptions,
    ) -> AccessResult<Vec<Permission>> {
        let key = CacheKey::user_direct(principal);
        self.cached_permissions(key, options, || self.user_direct_permissions(principal))
            .await
    }

    /// Permissions assigned to the principal itself, without role or team grants.
    async fn user_direct_permissions(
        &self,
        principal: &Principal,
    ) -> AccessResult<Vec<Permission>> {
        let query = UserPermissionsQuery::new(principal.org_id)
            .user(principal.user_id()?)
            .role_prefixes(&OSS_ROLE_PREFIXES);
        let mut permissions = self.store.get_user_permissions(&query).await?;

        if self.features.is_enabled(flags::NESTED_FOLDERS) {
            permissions.push(Permission::shared_with_me_folder());
        }
        Ok(permissions)
    }

    /// Team slices from the cache, with one batched store call for the misses.
    ///
    /// Each distinct team is looked up and fetched once. Every missed team is
    /// written back, including teams without permissions. A team listed twice
    /// contributes its slice twice, as on the uncached path.
    #[instrument(
        name = "authz.cached_teams_permissions",
        skip_all,
        fields(teams = principal.team_ids.len())
    )]
    async fn cached_teams_permissions(
        &self,
        principal: &Principal,
        options: ResolveOptions,
    ) -> AccessResult<Vec<Permission>> {
        let org_id = principal.org_id;
        let mut slices: HashMap<TeamId, Vec<Permission>> = HashMap::new();
        let mut missed: Vec<TeamId> = Vec::new();

        for team_id in &principal.team_ids {
            if slices.contains_key(team_id) || missed.contains(team_id) {
                continue;
            }
            if !options.reload_cache {
                if let Some(slice) = self.cache_lookup(&CacheKey::team(*team_id, org_id)).await {
                    metrics::record_cache_usage(TEAM_KIND, CacheStatus::Hit);
                    slices.insert(*team_id, slice);
                    continue;
                }
            }
            missed.push(*team_id);
        }

        if !missed.is_empty() {
            metrics::record_cache_usage(TEAM_KIND, CacheStatus::Miss);
            let query = UserPermissionsQuery::new(org_id)
                .teams(missed.clone())
                .role_prefixes(&OSS_ROLE_PREFIXES);
            let mut fetched = self.store.get_teams_permissions(&query).await?;

            for team_id in missed {
                let slice = fetched.remove(&team_id).unwrap_or_default();
                self.cache_store(CacheKey::team(team_id, org_id), slice.clone())
                    .await;
                slices.insert(team_id, slice);
            }
        }

        Ok(principal
            .team_ids
            .iter()
            .filter_map(|team_id| slices.get(team_id))
            .flatten()
            .cloned()
            .collect())
    }

    /// Cache-or-compute for one slice.
    ///
    /// On a miss (or when reloading) `produce` runs and its result is stored
    /// with the configured TTL. Producer errors are returned and nothing is
    /// cached.
    pub(crate) async fn cached_permissions<F, Fut>(
        &self,
        key: CacheKey,
        options: ResolveOptions,
        produce: F,
    ) -> AccessResult<Vec<Permission>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AccessResult<Vec<Permission>>>,
    {
        let kind = key.kind();
        if !options.reload_cache {
            if let Some(permissions) = self.cache_lookup(&key).await {
                metrics::record_cache_usage(kind, CacheStatus::Hit);
                return Ok(permissions);
            }
        }

        metrics::record_cache_usage(kind, CacheStatus::Miss);
        let permissions = produce().await?;
        self.cache_store(key, permissions.clone()).await;
        Ok(permissions)
    }

    /// Cache read where a failing cache counts as a miss.
    pub(crate) async fn cache_lookup(&self, key: &CacheKey) -> Option<Vec<Permission>> {
        match self.cache.get(key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "permission cache read failed; treating as miss");
                None
            }
        }
    }

    pub(crate) async fn cache_store(&self, key: CacheKey, permissions: Vec<Permission>) {
        let ttl = self.config.cache_ttl();
        if let Err(err) = self.cache.set(key.clone(), permissions, ttl).await {
            warn!(key = %key, error = %err, "permission cache write failed");
        }
    }
}
