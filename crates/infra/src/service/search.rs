use std::collections::{HashMap, HashSet};

use tracing::{debug, error, instrument};

use warden_auth::permissions::ACTION_USERS_PERMISSIONS_READ;
use warden_auth::roles::OSS_ROLE_PREFIXES;
use warden_auth::{CacheKey, Permission, Principal, SearchOptions};
use warden_core::{AccessError, AccessResult, OrgId, UserId};
use warden_observability::metrics::{self, CacheStatus, Timer};

use crate::cache::PermissionCache;
use crate::store::PermissionStore;

use super::AccessControlService;

/// Users whose permissions a requester may read.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Visibility {
    All,
    Only(HashSet<UserId>),
}

impl Visibility {
    /// Built from the requester's `users.permissions:read` scopes.
    ///
    /// A `*`-suffixed scope opens every user. A three-part `<kind>:id:<n>`
    /// scope opens user `n` whatever its kind, anything else opens nothing.
    fn of(requester: &Principal) -> Self {
        let Some(scopes) = requester.permissions.get(ACTION_USERS_PERMISSIONS_READ) else {
            return Visibility::Only(HashSet::new());
        };

        let mut ids = HashSet::new();
        for scope in scopes {
            if scope.ends_with('*') {
                return Visibility::All;
            }
            if let Some(id) = scoped_user_id(scope) {
                ids.insert(id);
            }
        }
        Visibility::Only(ids)
    }

    fn allows(&self, user_id: UserId) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Only(ids) => ids.contains(&user_id),
        }
    }
}

/// The numeric id of a `<kind>:<attribute>:<n>` scope.
fn scoped_user_id(scope: &str) -> Option<UserId> {
    let mut parts = scope.split(':');
    let (Some(_kind), Some(_attribute), Some(raw), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    raw.parse().ok()
}

fn oss_prefixes() -> Vec<String> {
    OSS_ROLE_PREFIXES.iter().map(|p| p.to_string()).collect()
}

impl<S, C> AccessControlService<S, C>
where
    S: PermissionStore,
    C: PermissionCache,
{
    /// Permissions matching `options` for every user the requester may see.
    ///
    /// With a namespaced id the search is limited to that user and served
    /// through the single-user cache. Users without matching permissions are
    /// left out of the result.
    #[instrument(
        name = "authz.search_users_permissions",
        skip_all,
        fields(org_id = %requester.org_id),
        err
    )]
    pub async fn search_users_permissions(
        &self,
        requester: &Principal,
        options: SearchOptions,
    ) -> AccessResult<HashMap<UserId, Vec<Permission>>> {
        let options = SearchOptions {
            role_prefixes: oss_prefixes(),
            ..options
        };
        let org_id = requester.org_id;
        let visibility = Visibility::of(requester);

        if options.namespaced_id.as_deref().is_some_and(|id| !id.is_empty()) {
            let user_id = options.compute_user_id().inspect_err(|err| {
                error!(error = %err, "failed to resolve user id");
            })?;
            if !visibility.allows(user_id) {
                return Ok(HashMap::new());
            }
            let permissions = self.search_user_permissions(org_id, options).await?;
            return Ok(HashMap::from([(user_id, permissions)]));
        }

        let _timer = Timer::start(metrics::SEARCH_PERMISSIONS_DURATION);

        let basic = self
            .registry
            .filter_basic_role_permissions(|p| options.matches(p));
        let (users_roles, mut stored) = tokio::try_join!(
            self.store.get_users_basic_roles(None, org_id),
            self.store.search_users_permissions(org_id, &options),
        )?;

        let mut result = HashMap::new();
        for (user_id, roles) in users_roles {
            if !visibility.allows(user_id) {
                continue;
            }
            let mut permissions: Vec<Permission> = roles
                .iter()
                .filter_map(|role| basic.get(role))
                .flatten()
                .cloned()
                .collect();
            if let Some(db) = stored.remove(&user_id) {
                permissions.extend(db);
            }
            if !permissions.is_empty() {
                result.insert(user_id, permissions);
            }
        }
        Ok(result)
    }

    /// Permissions of one user (`options.namespaced_id`) matching `options`.
    ///
    /// The user's full aggregate is cached and filtered per call, so searches
    /// with different filters share one entry.
    #[instrument(name = "authz.search_user_permissions", skip_all, fields(org_id = %org_id), err)]
    pub async fn search_user_permissions(
        &self,
        org_id: OrgId,
        options: SearchOptions,
    ) -> AccessResult<Vec<Permission>> {
        let _timer = Timer::start(metrics::PERMISSIONS_DURATION);

        if options.namespaced_id.as_deref().is_none_or(str::is_empty) {
            return Err(AccessError::validation("expected namespaced id to be specified"));
        }
        let user_id = options.compute_user_id()?;
        let key = CacheKey::user_search_by_id(user_id, org_id);

        if !options.reload_cache {
            if let Some(cached) = self.cache_lookup(&key).await {
                metrics::record_search_user_cache_usage(CacheStatus::Hit);
                debug!(key = %key, "using cached permissions");
                return Ok(cached.into_iter().filter(|p| options.matches(p)).collect());
            }
        }
        metrics::record_search_user_cache_usage(CacheStatus::Miss);

        let aggregate = self.user_search_aggregate(org_id, user_id, &options).await?;
        self.cache_store(key, aggregate.clone()).await;
        Ok(aggregate.into_iter().filter(|p| options.matches(p)).collect())
    }

    /// Unfiltered basic role and stored permissions of one user.
    async fn user_search_aggregate(
        &self,
        org_id: OrgId,
        user_id: UserId,
        options: &SearchOptions,
    ) -> AccessResult<Vec<Permission>> {
        let mut users_roles = self
            .store
            .get_users_basic_roles(Some(std::slice::from_ref(&user_id)), org_id)
            .await?;
        let roles = users_roles
            .remove(&user_id)
            .filter(|roles| !roles.is_empty())
            .ok_or_else(|| {
                AccessError::not_found(format!(
                    "no basic roles for user {user_id} in organization {org_id}"
                ))
            })?;

        let mut permissions: Vec<Permission> = roles
            .iter()
            .flat_map(|role| self.registry.basic_role_permissions(*role))
            .collect();

        let unfiltered = SearchOptions {
            role_prefixes: oss_prefixes(),
            namespaced_id: options.namespaced_id.clone(),
            ..SearchOptions::default()
        };
        let mut stored = self.store.search_users_permissions(org_id, &unfiltered).await?;
        permissions.extend(stored.remove(&user_id).unwrap_or_default());
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use warden_auth::{BasicRole, Role, RoleRegistration, group_scopes_by_action};
    use warden_core::TeamId;

    use super::*;
    use crate::config::AccessControlConfig;
    use crate::service::test_support::{Harness, harness};

    fn org() -> OrgId {
        OrgId::new(1)
    }

    fn requester(scopes: &[&str]) -> Principal {
        let held: Vec<Permission> = scopes
            .iter()
            .map(|s| Permission::new(ACTION_USERS_PERMISSIONS_READ, *s))
            .collect();
        Principal::user(org(), UserId::new(1), BasicRole::Admin)
            .with_permissions(group_scopes_by_action(&held))
    }

    fn seeded() -> Harness {
        let h = harness(AccessControlConfig::default());
        h.service
            .declare_fixed_roles([RoleRegistration::new(
                Role::new(
                    "fixed:teams:reader",
                    vec![Permission::new("teams:read", "teams:*")],
                ),
                ["Viewer"],
            )])
            .unwrap();
        h.service.register_fixed_roles();

        h.store.add_member(org(), UserId::new(7), BasicRole::Viewer, [TeamId::new(3)]);
        h.store.add_member(org(), UserId::new(8), BasicRole::Viewer, Vec::<TeamId>::new());
        h.store.add_member(org(), UserId::new(9), BasicRole::None, Vec::<TeamId>::new());
        h.store.grant_team(
            org(),
            TeamId::new(3),
            vec![Permission::new("teams:write", "teams:id:3")],
        );
        h.store.grant_user(
            org(),
            UserId::new(8),
            vec![Permission::new("dashboards:read", "dashboards:*")],
        );
        h
    }

    #[test]
    fn visibility_from_requester_scopes() {
        assert_eq!(Visibility::of(&requester(&["users:*"])), Visibility::All);
        assert_eq!(Visibility::of(&requester(&["*"])), Visibility::All);

        let some = Visibility::of(&requester(&["users:id:7", "users:id:x", "users:id:9:extra"]));
        assert!(some.allows(UserId::new(7)));
        assert!(!some.allows(UserId::new(9)));
        assert!(!some.allows(UserId::new(8)));

        // Any three-part scope with a numeric tail names a user id.
        let any_kind = Visibility::of(&requester(&["teams:id:8"]));
        assert!(any_kind.allows(UserId::new(8)));
        assert!(!any_kind.allows(UserId::new(7)));

        let none = Visibility::of(&Principal::user(org(), UserId::new(1), BasicRole::Admin));
        assert!(!none.allows(UserId::new(7)));
    }

    #[tokio::test]
    async fn bulk_search_merges_basic_and_stored_permissions() {
        let h = seeded();
        let found = h
            .service
            .search_users_permissions(
                &requester(&["users:*"]),
                SearchOptions::with_action_prefix("teams:"),
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(
            found[&UserId::new(7)],
            vec![
                Permission::new("teams:read", "teams:*"),
                Permission::new("teams:write", "teams:id:3"),
            ]
        );
        assert_eq!(found[&UserId::new(8)], vec![Permission::new("teams:read", "teams:*")]);
        assert!(!found.contains_key(&UserId::new(9)));
    }

    #[tokio::test]
    async fn bulk_search_honors_visibility() {
        let h = seeded();
        let found = h
            .service
            .search_users_permissions(
                &requester(&["users:id:7"]),
                SearchOptions::with_action_prefix(""),
            )
            .await
            .unwrap();
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![UserId::new(7)]);

        let nothing = h
            .service
            .search_users_permissions(&requester(&[]), SearchOptions::with_action_prefix(""))
            .await
            .unwrap();
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn namespaced_search_reroutes_to_single_user() {
        let h = seeded();
        let opts = SearchOptions::with_action("dashboards:read").for_identity("user:8");

        let found = h
            .service
            .search_users_permissions(&requester(&["users:*"]), opts.clone())
            .await
            .unwrap();
        assert_eq!(
            found,
            HashMap::from([(
                UserId::new(8),
                vec![Permission::new("dashboards:read", "dashboards:*")]
            )])
        );

        let hidden = h
            .service
            .search_users_permissions(&requester(&["users:id:7"]), opts)
            .await
            .unwrap();
        assert!(hidden.is_empty());

        let bad = SearchOptions::with_action_prefix("").for_identity("api-key:1");
        let err = h
            .service
            .search_users_permissions(&requester(&["users:*"]), bad)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn cached_aggregate_serves_other_filters() {
        let h = seeded();
        let teams = h
            .service
            .search_user_permissions(
                org(),
                SearchOptions::with_action_prefix("teams:").for_identity("user:7"),
            )
            .await
            .unwrap();
        assert_eq!(teams.len(), 2);
        h.store.reset_call_counts();

        let writes = h
            .service
            .search_user_permissions(
                org(),
                SearchOptions::with_action("teams:write").for_identity("user:7"),
            )
            .await
            .unwrap();
        assert_eq!(writes, vec![Permission::new("teams:write", "teams:id:3")]);
        assert_eq!(h.store.call_count("search_users_permissions"), 0);
    }

    #[tokio::test]
    async fn single_user_search_requires_membership_and_identity() {
        let h = seeded();
        let err = h
            .service
            .search_user_permissions(
                org(),
                SearchOptions::with_action_prefix("").for_identity("user:99"),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = h
            .service
            .search_user_permissions(org(), SearchOptions::with_action_prefix(""))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
