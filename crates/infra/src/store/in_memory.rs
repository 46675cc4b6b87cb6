use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use warden_auth::roles::MANAGED_ROLE_PREFIX;
use warden_auth::{BasicRole, Permission, SearchOptions};
use warden_core::{GLOBAL_ORG_ID, OrgId, StoreError, TeamId, UserId};

use super::r#trait::{
    PermissionStore, SaveExternalServiceRoleCommand, UserPermissionsQuery,
    external_service_role_name,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum Assignee {
    User(UserId),
    Team(TeamId),
    BasicRole(BasicRole),
}

#[derive(Debug, Clone, Default)]
struct Membership {
    role: Option<BasicRole>,
    teams: Vec<TeamId>,
}

#[derive(Debug, Default)]
struct State {
    /// Role permissions keyed by the role's owning org.
    roles: HashMap<(OrgId, String), Vec<Permission>>,
    /// Role names assigned per org and assignee.
    assignments: HashMap<(OrgId, Assignee), BTreeSet<String>>,
    members: HashMap<(OrgId, UserId), Membership>,
    server_admins: HashSet<UserId>,
}

impl State {
    fn role_permissions(&self, org_id: OrgId, name: &str) -> Option<&Vec<Permission>> {
        self.roles
            .get(&(org_id, name.to_string()))
            .or_else(|| self.roles.get(&(GLOBAL_ORG_ID, name.to_string())))
    }

    /// Permissions of roles assigned to any of `assignees` in `org_id` or globally.
    fn collect(
        &self,
        org_id: OrgId,
        assignees: &[Assignee],
        prefixes: &[String],
    ) -> Vec<Permission> {
        let mut out = Vec::new();
        for org in [org_id, GLOBAL_ORG_ID] {
            for assignee in assignees {
                let Some(names) = self.assignments.get(&(org, *assignee)) else {
                    continue;
                };
                for name in names {
                    if !prefixes.is_empty()
                        && !prefixes.iter().any(|p| name.starts_with(p.as_str()))
                    {
                        continue;
                    }
                    if let Some(perms) = self.role_permissions(org, name) {
                        out.extend(perms.iter().cloned());
                    }
                }
            }
            if org_id == GLOBAL_ORG_ID {
                break;
            }
        }
        out
    }

    fn basic_roles_of(&self, org_id: OrgId, user_id: UserId) -> Vec<BasicRole> {
        let mut roles: Vec<BasicRole> = self
            .members
            .get(&(org_id, user_id))
            .and_then(|m| m.role)
            .into_iter()
            .collect();
        if self.server_admins.contains(&user_id) {
            roles.push(BasicRole::ServerAdmin);
        }
        roles
    }

    /// Drop the assignments, managed role and scoped grants of one entity.
    fn purge(&mut self, org_id: OrgId, assignee: Assignee, managed_role: &str, scope: &str) {
        let in_scope = |org: OrgId| org_id == GLOBAL_ORG_ID || org == org_id;

        self.assignments
            .retain(|(org, a), _| !(in_scope(*org) && *a == assignee));
        self.roles
            .retain(|(org, name), _| !(in_scope(*org) && name == managed_role));
        for ((org, _), perms) in self.roles.iter_mut() {
            if in_scope(*org) {
                perms.retain(|p| p.scope != scope);
            }
        }
    }
}

/// In-memory permission store.
///
/// Intended for tests/dev. Counts calls per operation and can be switched
/// into a failing mode to exercise error paths.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    state: RwLock<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
    team_queries: Mutex<Vec<Vec<TeamId>>>,
    unavailable: AtomicBool,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of times `operation` (a trait method name) was invoked.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Team ids requested by each `get_teams_permissions` call, oldest first.
    pub fn team_queries(&self) -> Vec<Vec<TeamId>> {
        self.team_queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears call counts and recorded team queries.
    pub fn reset_call_counts(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.team_queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Register `user_id` as a member of `org_id` holding `role` and the given teams.
    pub fn add_member(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role: BasicRole,
        teams: impl IntoIterator<Item = TeamId>,
    ) {
        let mut state = self.write_seed();
        state.members.insert(
            (org_id, user_id),
            Membership {
                role: Some(role),
                teams: teams.into_iter().collect(),
            },
        );
    }

    pub fn set_server_admin(&self, user_id: UserId, is_server_admin: bool) {
        let mut state = self.write_seed();
        if is_server_admin {
            state.server_admins.insert(user_id);
        } else {
            state.server_admins.remove(&user_id);
        }
    }

    /// Append permissions to the user's managed role in `org_id`.
    pub fn grant_user(&self, org_id: OrgId, user_id: UserId, permissions: Vec<Permission>) {
        let role = format!("{MANAGED_ROLE_PREFIX}users:{user_id}:permissions");
        self.grant(org_id, Assignee::User(user_id), &role, permissions);
    }

    pub fn grant_team(&self, org_id: OrgId, team_id: TeamId, permissions: Vec<Permission>) {
        let role = format!("{MANAGED_ROLE_PREFIX}teams:{team_id}:permissions");
        self.grant(org_id, Assignee::Team(team_id), &role, permissions);
    }

    pub fn grant_basic_role(&self, org_id: OrgId, role: BasicRole, permissions: Vec<Permission>) {
        let name = format!(
            "{MANAGED_ROLE_PREFIX}builtins:{}:permissions",
            role.as_str().to_lowercase().replace(' ', "")
        );
        self.grant(org_id, Assignee::BasicRole(role), &name, permissions);
    }

    /// Assign an arbitrarily named role to a user, e.g. a non-OSS `fixed:` role.
    pub fn grant_user_role(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role_name: &str,
        permissions: Vec<Permission>,
    ) {
        self.grant(org_id, Assignee::User(user_id), role_name, permissions);
    }

    fn grant(
        &self,
        org_id: OrgId,
        assignee: Assignee,
        role_name: &str,
        permissions: Vec<Permission>,
    ) {
        let mut state = self.write_seed();
        let perms = state
            .roles
            .entry((org_id, role_name.to_string()))
            .or_default();
        for p in permissions {
            if !perms.contains(&p) {
                perms.push(p);
            }
        }
        state
            .assignments
            .entry((org_id, assignee))
            .or_default()
            .insert(role_name.to_string());
    }

    // Seeding bypasses failure injection and call counting.
    fn write_seed(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, operation: &'static str) -> Result<(), StoreError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation)
            .or_insert(0) += 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{operation}: store offline")));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<Vec<Permission>, StoreError> {
        self.enter("get_user_permissions")?;
        let state = self.read()?;

        let mut assignees: Vec<Assignee> = query.user_id.map(Assignee::User).into_iter().collect();
        assignees.extend(query.team_ids.iter().copied().map(Assignee::Team));
        assignees.extend(query.roles.iter().copied().map(Assignee::BasicRole));

        Ok(state.collect(query.org_id, &assignees, &query.role_prefixes))
    }

    async fn get_basic_roles_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<Vec<Permission>, StoreError> {
        self.enter("get_basic_roles_permissions")?;
        let state = self.read()?;

        let assignees: Vec<Assignee> = query
            .roles
            .iter()
            .copied()
            .map(Assignee::BasicRole)
            .collect();
        Ok(state.collect(query.org_id, &assignees, &query.role_prefixes))
    }

    async fn get_teams_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> Result<HashMap<TeamId, Vec<Permission>>, StoreError> {
        self.enter("get_teams_permissions")?;
        self.team_queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.team_ids.clone());
        let state = self.read()?;

        let mut out = HashMap::new();
        for team_id in &query.team_ids {
            let perms = state.collect(
                query.org_id,
                &[Assignee::Team(*team_id)],
                &query.role_prefixes,
            );
            if !perms.is_empty() {
                out.insert(*team_id, perms);
            }
        }
        Ok(out)
    }

    async fn get_users_basic_roles(
        &self,
        user_ids: Option<&[UserId]>,
        org_id: OrgId,
    ) -> Result<HashMap<UserId, Vec<BasicRole>>, StoreError> {
        self.enter("get_users_basic_roles")?;
        let state = self.read()?;

        let mut out = HashMap::new();
        for (org, user_id) in state.members.keys() {
            if *org != org_id {
                continue;
            }
            if user_ids.is_some_and(|ids| !ids.contains(user_id)) {
                continue;
            }
            out.insert(*user_id, state.basic_roles_of(org_id, *user_id));
        }
        Ok(out)
    }

    async fn search_users_permissions(
        &self,
        org_id: OrgId,
        options: &SearchOptions,
    ) -> Result<HashMap<UserId, Vec<Permission>>, StoreError> {
        self.enter("search_users_permissions")?;
        let only = match options.namespaced_id.as_deref() {
            Some(id) if !id.is_empty() => Some(
                options
                    .compute_user_id()
                    .map_err(|e| StoreError::InvalidQuery(format!("{id}: {e}")))?,
            ),
            _ => None,
        };
        let state = self.read()?;

        let mut out = HashMap::new();
        for ((org, user_id), membership) in &state.members {
            if *org != org_id || only.is_some_and(|id| id != *user_id) {
                continue;
            }
            let mut assignees = vec![Assignee::User(*user_id)];
            assignees.extend(membership.teams.iter().copied().map(Assignee::Team));
            assignees.extend(
                state
                    .basic_roles_of(org_id, *user_id)
                    .into_iter()
                    .map(Assignee::BasicRole),
            );

            let matching: Vec<Permission> = state
                .collect(org_id, &assignees, &options.role_prefixes)
                .into_iter()
                .filter(|p| options.matches(p))
                .collect();
            if !matching.is_empty() {
                out.insert(*user_id, matching);
            }
        }
        Ok(out)
    }

    async fn delete_user_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        self.enter("delete_user_permissions")?;
        let mut state = self.write()?;
        state.purge(
            org_id,
            Assignee::User(user_id),
            &format!("{MANAGED_ROLE_PREFIX}users:{user_id}:permissions"),
            &format!("users:id:{user_id}"),
        );
        Ok(())
    }

    async fn delete_team_permissions(
        &self,
        org_id: OrgId,
        team_id: TeamId,
    ) -> Result<(), StoreError> {
        self.enter("delete_team_permissions")?;
        let mut state = self.write()?;
        state.purge(
            org_id,
            Assignee::Team(team_id),
            &format!("{MANAGED_ROLE_PREFIX}teams:{team_id}:permissions"),
            &format!("teams:id:{team_id}"),
        );
        Ok(())
    }

    async fn save_external_service_role(
        &self,
        cmd: &SaveExternalServiceRoleCommand,
    ) -> Result<(), StoreError> {
        self.enter("save_external_service_role")?;
        let role_name = cmd.role_name();
        let mut state = self.write()?;

        state
            .roles
            .insert((GLOBAL_ORG_ID, role_name.clone()), cmd.permissions.clone());
        for names in state.assignments.values_mut() {
            names.remove(&role_name);
        }
        state
            .assignments
            .entry((cmd.assignment_org_id, Assignee::User(cmd.service_account_id)))
            .or_default()
            .insert(role_name);
        Ok(())
    }

    async fn delete_external_service_role(
        &self,
        external_service_id: &str,
    ) -> Result<(), StoreError> {
        self.enter("delete_external_service_role")?;
        let role_name = external_service_role_name(external_service_id);
        let mut state = self.write()?;

        state.roles.retain(|(_, name), _| *name != role_name);
        for names in state.assignments.values_mut() {
            names.remove(&role_name);
        }
        state.assignments.retain(|_, names| !names.is_empty());
        Ok(())
    }
}
