use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use warden_auth::{
    BasicRole, CacheKey, Permission, Principal, Role, RoleRegistration, RoleRegistry,
    SearchOptions, group_scopes_by_action,
};
use warden_core::{AccessError, OrgId, TeamId, UserId};
use warden_infra::{
    AccessControlConfig, AccessControlService, CacheError, InMemoryPermissionStore,
    MokaPermissionCache, PermissionCache, ResolveOptions, StaticFeatureToggles,
};

type Service<C> = AccessControlService<Arc<InMemoryPermissionStore>, C>;

fn org() -> OrgId {
    OrgId::new(1)
}

fn multiset(perms: &[Permission]) -> BTreeMap<(String, String), usize> {
    let mut out = BTreeMap::new();
    for p in perms {
        *out.entry((p.action.clone(), p.scope.clone())).or_insert(0) += 1;
    }
    out
}

fn viewer_dashboards() -> RoleRegistration {
    RoleRegistration::new(
        Role::new(
            "fixed:dashboards:reader",
            vec![Permission::new("dashboards:read", "dashboards:*")],
        ),
        ["Viewer"],
    )
}

fn build<C: PermissionCache>(
    config: AccessControlConfig,
    cache: C,
) -> (Service<C>, Arc<InMemoryPermissionStore>) {
    warden_observability::tracing::init_for_tests();

    let registry = Arc::new(RoleRegistry::new());
    registry.declare_fixed_roles([viewer_dashboards()]).unwrap();
    registry.register_fixed_roles();

    let store = Arc::new(InMemoryPermissionStore::new());
    store.add_member(org(), UserId::new(42), BasicRole::Viewer, [TeamId::new(10)]);
    store.grant_user(
        org(),
        UserId::new(42),
        vec![Permission::new("datasources:read", "datasources:*")],
    );

    let service = AccessControlService::new(
        config,
        registry,
        store.clone(),
        cache,
        Arc::new(StaticFeatureToggles::default()),
    );
    (service, store)
}

fn moka() -> Arc<MokaPermissionCache> {
    Arc::new(MokaPermissionCache::new(10_000))
}

fn principal_42() -> Principal {
    Principal::user(org(), UserId::new(42), BasicRole::Viewer).with_teams([TeamId::new(10)])
}

#[tokio::test]
async fn viewer_with_team_and_direct_grant() {
    let (service, store) = build(AccessControlConfig::default(), moka());

    let first = service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    let expected = vec![
        Permission::new("dashboards:read", "dashboards:*"),
        Permission::new("datasources:read", "datasources:*"),
    ];
    assert_eq!(multiset(&first), multiset(&expected));
    assert_eq!(store.call_count("get_user_permissions"), 1);

    let second = service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(multiset(&second), multiset(&expected));
    assert_eq!(store.call_count("get_user_permissions"), 1);
}

#[tokio::test]
async fn reload_twice_yields_identical_results() {
    let (service, _store) = build(AccessControlConfig::default(), moka());
    let a = service
        .get_user_permissions(&principal_42(), ResolveOptions::reload())
        .await
        .unwrap();
    let b = service
        .get_user_permissions(&principal_42(), ResolveOptions::reload())
        .await
        .unwrap();
    assert_eq!(multiset(&a), multiset(&b));
}

#[tokio::test]
async fn cached_and_uncached_paths_agree() {
    let (cached, _) = build(AccessControlConfig::default(), moka());
    let (uncached, _) = build(AccessControlConfig::uncached(), moka());

    // Warm, then read from cache.
    cached
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    let hit = cached
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    let computed = uncached
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(multiset(&hit), multiset(&computed));
}

#[tokio::test]
async fn clearing_cache_forces_one_store_round_trip() {
    let (service, store) = build(AccessControlConfig::default(), moka());
    service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();

    service.clear_user_permission_cache(&principal_42()).await;
    store.reset_call_counts();
    service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(store.call_count("get_user_permissions"), 1);

    service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(store.call_count("get_user_permissions"), 1);
}

#[tokio::test]
async fn editor_grant_reaches_editors_and_admins() {
    let (service, _) = build(AccessControlConfig::default(), moka());
    service
        .declare_fixed_roles([RoleRegistration::new(
            Role::new(
                "fixed:folders:writer",
                vec![Permission::new("folders:write", "folders:*")],
            ),
            ["Editor"],
        )])
        .unwrap();
    service.register_fixed_roles();

    let write = Permission::new("folders:write", "folders:*");
    for (role, expected) in [
        (BasicRole::Viewer, false),
        (BasicRole::Editor, true),
        (BasicRole::Admin, true),
    ] {
        let p = Principal::user(org(), UserId::new(100), role);
        let perms = service
            .get_user_permissions(&p, ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(perms.contains(&write), expected, "{role}");
    }
}

#[tokio::test]
async fn late_registration_does_not_touch_warm_entries() {
    let (service, _) = build(AccessControlConfig::default(), moka());
    let editor = Principal::user(org(), UserId::new(100), BasicRole::Editor);
    service
        .get_user_permissions(&editor, ResolveOptions::default())
        .await
        .unwrap();

    service
        .declare_fixed_roles([RoleRegistration::new(
            Role::new("fixed:teams:creator", vec![Permission::unscoped("teams:create")]),
            ["Editor"],
        )])
        .unwrap();
    service.register_fixed_roles();

    let create = Permission::unscoped("teams:create");
    let warm = service
        .get_user_permissions(&editor, ResolveOptions::default())
        .await
        .unwrap();
    assert!(!warm.contains(&create));

    let reloaded = service
        .get_user_permissions(&editor, ResolveOptions::reload())
        .await
        .unwrap();
    assert!(reloaded.contains(&create));
}

#[tokio::test]
async fn team_batch_covers_only_missed_teams() {
    let (service, store) = build(AccessControlConfig::default(), moka());
    for team in [10, 11, 12] {
        store.grant_team(
            org(),
            TeamId::new(team),
            vec![Permission::new("teams:read", format!("teams:id:{team}"))],
        );
    }
    // Pre-populate team 10.
    let warm = Principal::user(org(), UserId::new(42), BasicRole::Viewer)
        .with_teams([TeamId::new(10)]);
    service
        .get_user_permissions(&warm, ResolveOptions::default())
        .await
        .unwrap();
    store.reset_call_counts();

    let all = warm.with_teams([TeamId::new(10), TeamId::new(11), TeamId::new(12)]);
    let perms = service
        .get_user_permissions(&all, ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(store.call_count("get_teams_permissions"), 1);
    assert_eq!(
        store.team_queries(),
        vec![vec![TeamId::new(11), TeamId::new(12)]]
    );
    let team_reads = perms.iter().filter(|p| p.action == "teams:read").count();
    assert_eq!(team_reads, 3);
}

#[tokio::test]
async fn scoped_view_grant_limits_search_results() {
    let (service, store) = build(AccessControlConfig::default(), moka());
    for id in [7, 8, 9] {
        store.add_member(org(), UserId::new(id), BasicRole::Viewer, Vec::<TeamId>::new());
        store.grant_user(
            org(),
            UserId::new(id),
            vec![Permission::new("dashboards:write", format!("dashboards:uid:{id}"))],
        );
    }

    let requester = Principal::user(org(), UserId::new(1), BasicRole::Admin).with_permissions(
        group_scopes_by_action(&[Permission::new("users.permissions:read", "users:id:7")]),
    );
    let found = service
        .search_users_permissions(&requester, SearchOptions::with_action_prefix("dashboards:"))
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert!(found.contains_key(&UserId::new(7)));
}

#[tokio::test]
async fn store_failure_propagates_unmodified() {
    let (service, store) = build(AccessControlConfig::default(), moka());
    store.set_unavailable(true);

    for options in [ResolveOptions::default(), ResolveOptions::reload()] {
        let err = service
            .get_user_permissions(&principal_42(), options)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Store(warden_core::StoreError::Unavailable(_))));
    }

    let (uncached, store) = build(AccessControlConfig::uncached(), moka());
    store.set_unavailable(true);
    assert!(
        uncached
            .get_user_permissions(&principal_42(), ResolveOptions::default())
            .await
            .is_err()
    );
}

/// Cache that fails every operation.
struct BrokenCache;

#[async_trait]
impl PermissionCache for BrokenCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<Permission>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(
        &self,
        _key: CacheKey,
        _permissions: Vec<Permission>,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn failing_cache_falls_through_to_store() {
    let (service, store) = build(AccessControlConfig::default(), BrokenCache);

    for _ in 0..2 {
        let perms = service
            .get_user_permissions(&principal_42(), ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(perms.len(), 2);
    }
    assert_eq!(store.call_count("get_user_permissions"), 2);
    service.clear_user_permission_cache(&principal_42()).await;
}

#[tokio::test]
async fn entries_expire_after_configured_ttl() {
    let config = AccessControlConfig {
        cache_ttl_secs: 1,
        ..AccessControlConfig::default()
    };
    let (service, store) = build(config, moka());

    service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    service
        .get_user_permissions(&principal_42(), ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(store.call_count("get_user_permissions"), 2);
}
