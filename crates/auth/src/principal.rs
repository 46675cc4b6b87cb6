use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::{AccessError, AccessResult, OrgId, TeamId, UserId};

use crate::BasicRole;

/// Kind of identity behind a principal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
    User,
    ServiceAccount,
    ApiKey,
    Anonymous,
    Render,
    AccessPolicy,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::User => "user",
            Namespace::ServiceAccount => "service-account",
            Namespace::ApiKey => "api-key",
            Namespace::Anonymous => "anonymous",
            Namespace::Render => "render",
            Namespace::AccessPolicy => "access-policy",
        }
    }

    /// Namespaces whose identifier is a numeric user id.
    pub fn is_user_backed(&self) -> bool {
        matches!(self, Namespace::User | Namespace::ServiceAccount)
    }
}

impl FromStr for Namespace {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Namespace::User),
            "service-account" => Ok(Namespace::ServiceAccount),
            "api-key" => Ok(Namespace::ApiKey),
            "anonymous" => Ok(Namespace::Anonymous),
            "render" => Ok(Namespace::Render),
            "access-policy" => Ok(Namespace::AccessPolicy),
            other => Err(AccessError::validation(format!("invalid namespace '{other}'"))),
        }
    }
}

/// `<namespace>:<identifier>` reference to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedId {
    pub namespace: Namespace,
    pub id: String,
}

impl NamespacedId {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    pub fn user(id: UserId) -> Self {
        Self::new(Namespace::User, id.to_string())
    }

    pub fn service_account(id: UserId) -> Self {
        Self::new(Namespace::ServiceAccount, id.to_string())
    }

    /// Numeric user id for user-backed namespaces, `None` for the others.
    ///
    /// A user-backed id that does not parse is a validation error.
    pub fn user_id(&self) -> AccessResult<Option<UserId>> {
        if !self.namespace.is_user_backed() {
            return Ok(None);
        }
        self.id.parse::<UserId>().map(Some)
    }
}

impl core::fmt::Display for NamespacedId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.namespace.as_str(), self.id)
    }
}

impl FromStr for NamespacedId {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, id) = s
            .split_once(':')
            .filter(|(_, id)| !id.is_empty() && !id.contains(':'))
            .ok_or_else(|| AccessError::validation(format!("invalid namespaced id '{s}'")))?;
        Ok(Self::new(namespace.parse()?, id))
    }
}

/// An authenticated identity acting within one organization.
///
/// Construction is decoupled from sessions and storage: the caller resolves
/// identity, org membership and teams before handing the principal over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub org_id: OrgId,
    pub namespaced_id: NamespacedId,
    /// Role held in `org_id`.
    pub org_role: BasicRole,
    pub is_server_admin: bool,
    pub team_ids: Vec<TeamId>,
    /// Already-known permissions in `org_id` as `action -> scopes`.
    pub permissions: HashMap<String, Vec<String>>,
}

impl Principal {
    pub fn new(org_id: OrgId, namespaced_id: NamespacedId, org_role: BasicRole) -> Self {
        Self {
            org_id,
            namespaced_id,
            org_role,
            is_server_admin: false,
            team_ids: Vec::new(),
            permissions: HashMap::new(),
        }
    }

    pub fn user(org_id: OrgId, user_id: UserId, org_role: BasicRole) -> Self {
        Self::new(org_id, NamespacedId::user(user_id), org_role)
    }

    pub fn with_teams(mut self, team_ids: impl IntoIterator<Item = TeamId>) -> Self {
        self.team_ids = team_ids.into_iter().collect();
        self
    }

    pub fn with_server_admin(mut self, is_server_admin: bool) -> Self {
        self.is_server_admin = is_server_admin;
        self
    }

    pub fn with_permissions(mut self, permissions: HashMap<String, Vec<String>>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Basic roles held: the org role plus the server-admin marker.
    pub fn basic_roles(&self) -> Vec<BasicRole> {
        let mut roles = vec![self.org_role];
        if self.is_server_admin {
            roles.push(BasicRole::ServerAdmin);
        }
        roles
    }

    /// Whether the identity maps to a stable, unique record.
    ///
    /// Anonymous and render principals share state, so their permissions are
    /// never cached per identity.
    pub fn has_unique_id(&self) -> bool {
        matches!(
            self.namespaced_id.namespace,
            Namespace::User | Namespace::ServiceAccount | Namespace::ApiKey
        )
    }

    pub fn user_id(&self) -> AccessResult<Option<UserId>> {
        self.namespaced_id.user_id()
    }

    /// Identity component of this principal's cache keys.
    ///
    /// User-backed principals use their numeric id so that a lookup by id
    /// (search) lands on the same entries.
    pub fn cache_identity(&self) -> String {
        match self.namespaced_id.user_id() {
            Ok(Some(id)) => id.to_string(),
            _ => format!(
                "{}-{}",
                self.namespaced_id.namespace.as_str(),
                self.namespaced_id.id
            ),
        }
    }
}
