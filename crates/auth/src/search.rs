//! Search predicates over permissions.

use serde::{Deserialize, Serialize};

use warden_core::{AccessError, AccessResult, UserId};

use crate::permissions::{scope_prefix, wildcards_from_prefix};
use crate::{NamespacedId, Permission};

/// Predicate restricting which permissions (and users) a search returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Actions must start with this prefix (ignored when `action` is set).
    #[serde(default)]
    pub action_prefix: String,
    /// Exact action filter.
    #[serde(default)]
    pub action: Option<String>,
    /// Scope filter; wildcard grants covering it also match.
    #[serde(default)]
    pub scope: Option<String>,
    /// Stored role name prefixes to consider.
    #[serde(default)]
    pub role_prefixes: Vec<String>,
    /// Restrict the search to one identity (`user:42`).
    #[serde(default)]
    pub namespaced_id: Option<String>,
    #[serde(default)]
    pub reload_cache: bool,
}

impl SearchOptions {
    pub fn with_action_prefix(prefix: impl Into<String>) -> Self {
        Self {
            action_prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn for_identity(mut self, namespaced_id: impl Into<String>) -> Self {
        self.namespaced_id = Some(namespaced_id.into());
        self
    }

    /// Wildcard scopes that cover the scope filter (empty without one).
    pub fn wildcards(&self) -> Vec<String> {
        match self.scope.as_deref() {
            Some(scope) if !scope.is_empty() => wildcards_from_prefix(&scope_prefix(scope)),
            _ => Vec::new(),
        }
    }

    /// Numeric user id of the targeted identity.
    ///
    /// Only `user:` and `service-account:` identities resolve to a user id.
    pub fn compute_user_id(&self) -> AccessResult<UserId> {
        let raw = self
            .namespaced_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AccessError::validation("namespaced id must be set"))?;
        let id: NamespacedId = raw.parse()?;
        id.user_id()?.ok_or_else(|| {
            AccessError::validation(format!("invalid namespace '{}'", id.namespace.as_str()))
        })
    }

    pub fn matches(&self, permission: &Permission) -> bool {
        permission_matches_search_options(permission, self)
    }
}

/// Whether `permission` satisfies the search predicate.
///
/// A scope filter is checked first and is mandatory when present. An exact
/// action filter then wins over the action prefix.
pub fn permission_matches_search_options(permission: &Permission, options: &SearchOptions) -> bool {
    if let Some(scope) = options.scope.as_deref().filter(|s| !s.is_empty()) {
        let matches_scope =
            permission.scope == scope || options.wildcards().iter().any(|w| *w == permission.scope);
        if !matches_scope {
            return false;
        }
    }
    match options.action.as_deref().filter(|a| !a.is_empty()) {
        Some(action) => permission.action == action,
        None => permission.action.starts_with(&options.action_prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_matches_wildcard_grants() {
        let opts = SearchOptions::with_action_prefix("dashboards:").scope("dashboards:uid:abc");
        assert!(opts.matches(&Permission::new("dashboards:read", "dashboards:*")));
        assert!(opts.matches(&Permission::new("dashboards:read", "dashboards:uid:*")));
        assert!(opts.matches(&Permission::new("dashboards:read", "*")));
        assert!(opts.matches(&Permission::new("dashboards:read", "dashboards:uid:abc")));
        assert!(!opts.matches(&Permission::new("dashboards:read", "dashboards:uid:xyz")));
        assert!(!opts.matches(&Permission::new("dashboards:read", "folders:*")));
    }

    #[test]
    fn exact_action_wins_over_prefix() {
        let mut opts = SearchOptions::with_action("dashboards:read");
        opts.action_prefix = "dashboards:".to_string();
        assert!(!opts.matches(&Permission::new("dashboards:write", "dashboards:*")));
        assert!(opts.matches(&Permission::new("dashboards:read", "dashboards:*")));
    }

    #[test]
    fn action_prefix_matches() {
        let opts = SearchOptions::with_action_prefix("dashboards:");
        assert!(opts.matches(&Permission::new("dashboards:read", "")));
        assert!(!opts.matches(&Permission::new("folders:read", "")));
    }

    #[test]
    fn scope_check_applies_with_exact_action() {
        let opts = SearchOptions::with_action("dashboards:read").scope("dashboards:uid:abc");
        assert!(!opts.matches(&Permission::new("dashboards:read", "folders:*")));
    }

    #[test]
    fn computes_user_id() {
        let opts = SearchOptions::default().for_identity("user:7");
        assert_eq!(opts.compute_user_id().unwrap(), UserId::new(7));

        let sa = SearchOptions::default().for_identity("service-account:9");
        assert_eq!(sa.compute_user_id().unwrap(), UserId::new(9));

        for bad in ["", "user", "api-key:3", "user:seven"] {
            let opts = SearchOptions::default().for_identity(bad);
            assert!(opts.compute_user_id().unwrap_err().is_validation(), "{bad}");
        }
        assert!(SearchOptions::default().compute_user_id().is_err());
    }
}
