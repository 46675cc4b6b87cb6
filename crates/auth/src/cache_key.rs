//! Deterministic cache keys for permission slices.

use serde::{Deserialize, Serialize};

use warden_core::{OrgId, TeamId, UserId};

use crate::{BasicRole, Principal};

/// Address of one cached permission slice.
///
/// Every variant carries the organization, so entries never leak across
/// tenants. Equal logical entities always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    /// In-memory plus stored permissions of a basic role.
    BasicRole { role: BasicRole, org_id: OrgId },
    /// Stored permissions of a team.
    Team { team_id: TeamId, org_id: OrgId },
    /// Permissions granted to the principal itself.
    UserDirect { identity: String, org_id: OrgId },
    /// Aggregate permissions computed by a single-user search.
    UserSearch { identity: String, org_id: OrgId },
}

impl CacheKey {
    pub fn basic_role(role: BasicRole, org_id: OrgId) -> Self {
        Self::BasicRole { role, org_id }
    }

    pub fn team(team_id: TeamId, org_id: OrgId) -> Self {
        Self::Team { team_id, org_id }
    }

    pub fn user_direct(principal: &Principal) -> Self {
        Self::UserDirect {
            identity: principal.cache_identity(),
            org_id: principal.org_id,
        }
    }

    pub fn user_search(principal: &Principal) -> Self {
        Self::UserSearch {
            identity: principal.cache_identity(),
            org_id: principal.org_id,
        }
    }

    /// Aggregate key of a user known only by id.
    pub fn user_search_by_id(user_id: UserId, org_id: OrgId) -> Self {
        Self::UserSearch {
            identity: user_id.to_string(),
            org_id,
        }
    }

    /// Entity kind label, also used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::BasicRole { .. } => "basic-role",
            CacheKey::Team { .. } => "team",
            CacheKey::UserDirect { .. } => "user-direct",
            CacheKey::UserSearch { .. } => "user-search",
        }
    }

    pub fn org_id(&self) -> OrgId {
        match self {
            CacheKey::BasicRole { org_id, .. }
            | CacheKey::Team { org_id, .. }
            | CacheKey::UserDirect { org_id, .. }
            | CacheKey::UserSearch { org_id, .. } => *org_id,
        }
    }
}

/// `rbac-permissions:<kind>:<entity>:<org>`, the form used by external caches.
impl core::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = self.kind();
        let org = self.org_id();
        match self {
            CacheKey::BasicRole { role, .. } => {
                write!(f, "rbac-permissions:{kind}:{}:{org}", role.role_name())
            }
            CacheKey::Team { team_id, .. } => write!(f, "rbac-permissions:{kind}:{team_id}:{org}"),
            CacheKey::UserDirect { identity, .. } | CacheKey::UserSearch { identity, .. } => {
                write!(f, "rbac-permissions:{kind}:{identity}:{org}")
            }
        }
    }
}
