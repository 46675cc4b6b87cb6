use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use warden_core::{AccessError, AccessResult};

/// Scope that matches every resource.
pub const WILDCARD_SCOPE: &str = "*";

/// Action allowing a principal to inspect other users' permissions.
pub const ACTION_USERS_PERMISSIONS_READ: &str = "users.permissions:read";

/// Action for reading folders.
pub const ACTION_FOLDERS_READ: &str = "folders:read";

/// Uid of the virtual folder holding resources shared with the principal.
pub const SHARED_WITH_ME_FOLDER_UID: &str = "sharedwithme";

/// Number of leading scope segments that form a scope prefix (`kind:attribute:`).
const MAX_PREFIX_PARTS: usize = 2;

/// A single grant: an action over a scope.
///
/// Scopes are textual. A trailing `*` makes the scope a wildcard covering any
/// scope that starts with the text before it (e.g. `dashboards:*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub action: String,
    #[serde(default)]
    pub scope: String,
}

impl Permission {
    pub fn new(action: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            scope: scope.into(),
        }
    }

    /// Permission without a scope (e.g. global actions).
    pub fn unscoped(action: impl Into<String>) -> Self {
        Self::new(action, "")
    }

    /// Always-granted read on the shared-with-me virtual folder.
    pub fn shared_with_me_folder() -> Self {
        Self::new(
            ACTION_FOLDERS_READ,
            format!("folders:uid:{SHARED_WITH_ME_FOLDER_UID}"),
        )
    }

    pub fn is_wildcard(&self) -> bool {
        self.scope.ends_with('*')
    }

    /// Check the permission is well-formed (non-empty action, legal scope).
    pub fn validate(&self) -> AccessResult<()> {
        if self.action.trim().is_empty() {
            return Err(AccessError::validation("permission action must not be empty"));
        }
        if self.action.chars().any(char::is_whitespace) {
            return Err(AccessError::validation(format!(
                "permission action '{}' contains whitespace",
                self.action
            )));
        }
        validate_scope(&self.scope)
    }

    /// Whether this grant covers the `target` scope.
    pub fn covers_scope(&self, target: &str) -> bool {
        scope_covers(&self.scope, target)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.scope.is_empty() {
            f.write_str(&self.action)
        } else {
            write!(f, "{} on {}", self.action, self.scope)
        }
    }
}

/// Validate scope syntax.
///
/// Empty scopes are legal. Otherwise segments are `:`-separated, non-empty and
/// free of whitespace; `*` may only appear as a whole final segment.
pub fn validate_scope(scope: &str) -> AccessResult<()> {
    if scope.is_empty() || scope == WILDCARD_SCOPE {
        return Ok(());
    }

    let segments: Vec<&str> = scope.split(':').collect();
    let last = segments.len() - 1;
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(AccessError::validation(format!(
                "scope '{scope}' has an empty segment"
            )));
        }
        if segment.chars().any(char::is_whitespace) {
            return Err(AccessError::validation(format!(
                "scope '{scope}' contains whitespace"
            )));
        }
        if segment.contains('*') && (idx != last || *segment != WILDCARD_SCOPE) {
            return Err(AccessError::validation(format!(
                "scope '{scope}' may only end with a '*' segment"
            )));
        }
    }
    Ok(())
}

/// Whether a granted scope covers a target scope (equality or wildcard prefix).
pub fn scope_covers(granted: &str, target: &str) -> bool {
    if granted == target {
        return true;
    }
    match granted.strip_suffix('*') {
        Some(prefix) => !target.is_empty() && target.starts_with(prefix),
        None => false,
    }
}

/// Prefix of a scope: its first segments up to `kind:attribute:`.
///
/// `dashboards:uid:abc` -> `dashboards:uid:`, `dashboards:abc` -> `dashboards:`.
pub fn scope_prefix(scope: &str) -> String {
    let mut parts: Vec<&str> = scope.split(':').collect();
    if parts.len() > MAX_PREFIX_PARTS + 1 {
        parts.truncate(MAX_PREFIX_PARTS);
        parts.push("");
    }
    if let Some(last) = parts.last_mut() {
        *last = "";
    }
    parts.join(":")
}

/// Every wildcard that covers scopes with the given prefix, broadest first.
///
/// `dashboards:uid:` -> `["*", "dashboards:*", "dashboards:uid:*"]`.
pub fn wildcards_from_prefix(prefix: &str) -> Vec<String> {
    let mut wildcards = vec![WILDCARD_SCOPE.to_string()];
    let mut acc = String::new();
    for part in prefix.split(':').filter(|p| !p.is_empty()) {
        acc.push_str(part);
        acc.push(':');
        wildcards.push(format!("{acc}*"));
    }
    wildcards
}

/// Group a permission list into `action -> scopes`.
///
/// This is the shape a principal carries as its own permission map.
pub fn group_scopes_by_action(permissions: &[Permission]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for p in permissions {
        grouped.entry(p.action.clone()).or_default().push(p.scope.clone());
    }
    grouped
}
