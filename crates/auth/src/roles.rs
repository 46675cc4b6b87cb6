use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use warden_core::{AccessError, AccessResult};

use crate::Permission;

pub const BASIC_ROLE_PREFIX: &str = "basic:";
pub const FIXED_ROLE_PREFIX: &str = "fixed:";
pub const MANAGED_ROLE_PREFIX: &str = "managed:";
pub const EXTERNAL_SERVICE_ROLE_PREFIX: &str = "extsvc:";
pub const EXTENSION_ROLE_PREFIX: &str = "plugins:";

/// Stored role prefixes visible to open-source resolution.
///
/// Anything else in the store (e.g. premium custom roles) is ignored.
pub const OSS_ROLE_PREFIXES: [&str; 2] = [MANAGED_ROLE_PREFIX, EXTERNAL_SERVICE_ROLE_PREFIX];

/// Built-in role tier.
///
/// `ServerAdmin` is an instance-wide marker rather than an organization role,
/// so it has no place in the Viewer < Editor < Admin chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BasicRole {
    None,
    Viewer,
    Editor,
    Admin,
    #[serde(rename = "Server Admin")]
    ServerAdmin,
}

impl BasicRole {
    pub const ALL: [BasicRole; 5] = [
        BasicRole::None,
        BasicRole::Viewer,
        BasicRole::Editor,
        BasicRole::Admin,
        BasicRole::ServerAdmin,
    ];

    /// Grant-target name (`"Viewer"`, `"Server Admin"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            BasicRole::None => "None",
            BasicRole::Viewer => "Viewer",
            BasicRole::Editor => "Editor",
            BasicRole::Admin => "Admin",
            BasicRole::ServerAdmin => "Server Admin",
        }
    }

    /// Role name of the in-memory role definition (`"basic:viewer"`, ...).
    pub fn role_name(&self) -> &'static str {
        match self {
            BasicRole::None => "basic:none",
            BasicRole::Viewer => "basic:viewer",
            BasicRole::Editor => "basic:editor",
            BasicRole::Admin => "basic:admin",
            BasicRole::ServerAdmin => "basic:server_admin",
        }
    }

    /// Basic roles that include every permission of this one.
    pub fn parents(&self) -> &'static [BasicRole] {
        match self {
            BasicRole::Viewer => &[BasicRole::Editor, BasicRole::Admin],
            BasicRole::Editor => &[BasicRole::Admin],
            BasicRole::None | BasicRole::Admin | BasicRole::ServerAdmin => &[],
        }
    }

    fn description(&self) -> &'static str {
        match self {
            BasicRole::None => "Default role with no permissions",
            BasicRole::Viewer => "Read access to organization resources",
            BasicRole::Editor => "Viewer permissions plus create and edit access",
            BasicRole::Admin => "Editor permissions plus organization administration",
            BasicRole::ServerAdmin => "Instance-wide administration",
        }
    }
}

impl core::fmt::Display for BasicRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BasicRole {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BasicRole::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AccessError::validation(format!("invalid basic role '{s}'")))
    }
}

/// A named role and its permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Display group (e.g. the extension that declared the role).
    #[serde(default)]
    pub group: String,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: Vec<Permission>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            group: String::new(),
            permissions,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate_permissions(&self) -> AccessResult<()> {
        for p in &self.permissions {
            p.validate().map_err(|e| {
                AccessError::validation(format!("role '{}': {e}", self.name))
            })?;
        }
        Ok(())
    }
}

/// A role together with the basic roles it is granted to.
///
/// Grant targets are kept as names so that replay can soft-fail on unknown ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRegistration {
    pub role: Role,
    pub grants: Vec<String>,
}

impl RoleRegistration {
    pub fn new(role: Role, grants: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            role,
            grants: grants.into_iter().map(Into::into).collect(),
        }
    }
}

/// Role as declared by an extension, before namespacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRoleRegistration {
    pub role: ExtensionRole,
    pub grants: Vec<String>,
}

/// Fresh basic role definitions (no permissions yet).
pub fn basic_role_definitions() -> HashMap<BasicRole, Role> {
    BasicRole::ALL
        .into_iter()
        .map(|br| {
            let role = Role::new(br.role_name(), Vec::new())
                .with_display_name(br.as_str())
                .with_description(br.description());
            (br, role)
        })
        .collect()
}

/// Fixed roles must be `fixed:`-prefixed and carry well-formed permissions.
pub fn validate_fixed_role(role: &Role) -> AccessResult<()> {
    if !role.name.starts_with(FIXED_ROLE_PREFIX) {
        return Err(AccessError::validation(format!(
            "role '{}' is missing prefix '{FIXED_ROLE_PREFIX}'",
            role.name
        )));
    }
    role.validate_permissions()
}

/// Extension roles must live under `plugins:<id>:` and only use actions the
/// extension owns (`<id>:` or `<id>.` prefixed).
pub fn validate_extension_role(extension_id: &str, role: &Role) -> AccessResult<()> {
    let prefix = format!("{EXTENSION_ROLE_PREFIX}{extension_id}:");
    if !role.name.starts_with(&prefix) {
        return Err(AccessError::validation(format!(
            "role '{}' is missing prefix '{prefix}'",
            role.name
        )));
    }
    role.validate_permissions()?;

    let colon = format!("{extension_id}:");
    let dot = format!("{extension_id}.");
    for p in &role.permissions {
        if !p.action.starts_with(&colon) && !p.action.starts_with(&dot) {
            return Err(AccessError::validation(format!(
                "action '{}' is missing prefix '{colon}' or '{dot}'",
                p.action
            )));
        }
    }
    Ok(())
}

/// Every grant target must name a basic role.
pub fn validate_builtin_roles(grants: &[String]) -> AccessResult<()> {
    for grant in grants {
        grant.parse::<BasicRole>()?;
    }
    Ok(())
}

/// Grant targets plus every basic role that inherits from them.
///
/// Unknown names are passed through untouched; the caller decides how to
/// report them.
pub fn builtin_roles_with_parents(grants: &[String]) -> BTreeSet<String> {
    let mut res = BTreeSet::new();
    for grant in grants {
        res.insert(grant.clone());
        if let Ok(role) = grant.parse::<BasicRole>() {
            res.extend(role.parents().iter().map(|p| p.as_str().to_string()));
        }
    }
    res
}

/// Namespace extension registrations as `plugins:<id>:<slug>` roles.
pub fn extension_role_registrations(
    extension_id: &str,
    extension_name: &str,
    registrations: Vec<ExtensionRoleRegistration>,
) -> Vec<RoleRegistration> {
    registrations
        .into_iter()
        .map(|reg| {
            let name = format!(
                "{EXTENSION_ROLE_PREFIX}{extension_id}:{}",
                slugify(&reg.role.name)
            );
            RoleRegistration {
                role: Role {
                    name,
                    display_name: reg.role.name,
                    description: reg.role.description,
                    group: extension_name.to_string(),
                    permissions: reg.role.permissions,
                },
                grants: reg.grants,
            }
        })
        .collect()
}

/// Lowercase ASCII slug: runs of anything non-alphanumeric become one `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn basic_role_names_round_trip() {
        for role in BasicRole::ALL {
            assert_eq!(role.as_str().parse::<BasicRole>().unwrap(), role);
        }
        assert!("Owner".parse::<BasicRole>().is_err());
    }

    #[test]
    fn viewer_grant_reaches_every_including_role() {
        let res = builtin_roles_with_parents(&grants(&["Viewer"]));
        assert_eq!(res, set(&["Admin", "Editor", "Viewer"]));

        let res = builtin_roles_with_parents(&grants(&["Admin"]));
        assert_eq!(res.len(), 1);

        let res = builtin_roles_with_parents(&grants(&["Server Admin", "Bogus"]));
        assert_eq!(res, set(&["Bogus", "Server Admin"]));
    }

    #[test]
    fn fixed_role_requires_prefix_and_valid_permissions() {
        let ok = Role::new(
            "fixed:dashboards:reader",
            vec![Permission::new("dashboards:read", "dashboards:*")],
        );
        assert!(validate_fixed_role(&ok).is_ok());

        let unprefixed = Role::new("dashboards:reader", vec![]);
        assert!(validate_fixed_role(&unprefixed).is_err());

        let bad_scope = Role::new("fixed:x", vec![Permission::new("x:read", "x:*:y")]);
        assert!(validate_fixed_role(&bad_scope).is_err());
    }

    #[test]
    fn grant_targets_must_be_basic_roles() {
        assert!(validate_builtin_roles(&grants(&["Viewer", "Server Admin", "None"])).is_ok());
        assert!(validate_builtin_roles(&grants(&["Viewer", "Superuser"])).is_err());
    }

    #[test]
    fn extension_roles_are_namespaced_and_checked() {
        let regs = extension_role_registrations(
            "oncall",
            "OnCall",
            vec![ExtensionRoleRegistration {
                role: ExtensionRole {
                    name: "Schedules Reader".to_string(),
                    description: "Read schedules".to_string(),
                    permissions: vec![Permission::unscoped("oncall:schedules:read")],
                },
                grants: grants(&["Viewer"]),
            }],
        );
        assert_eq!(regs[0].role.name, "plugins:oncall:schedules-reader");
        assert_eq!(regs[0].role.display_name, "Schedules Reader");
        assert_eq!(regs[0].role.group, "OnCall");
        assert!(validate_extension_role("oncall", &regs[0].role).is_ok());

        let foreign = Role::new("plugins:oncall:x", vec![Permission::unscoped("dashboards:read")]);
        assert!(validate_extension_role("oncall", &foreign).is_err());
        assert!(validate_extension_role("other", &regs[0].role).is_err());
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Schedules Reader"), "schedules-reader");
        assert_eq!(slugify("  My--Service_ID!! "), "my-service-id");
        assert_eq!(slugify("abc"), "abc");
    }
}
