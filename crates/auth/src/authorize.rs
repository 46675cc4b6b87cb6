use thiserror::Error;

use crate::Permission;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{action}'")]
    Forbidden { action: String },

    #[error("forbidden: missing permission '{action}' on '{scope}'")]
    ForbiddenScope { action: String, scope: String },
}

/// Check a resolved permission list for `action`, optionally on `scope`.
///
/// - No IO
/// - No panics
/// - Wildcard grants (`dashboards:*`, `*`) cover any scope with their prefix
///
/// Without a scope, holding the action on any scope is enough.
pub fn authorize(
    permissions: &[Permission],
    action: &str,
    scope: Option<&str>,
) -> Result<(), AuthzError> {
    let mut held = permissions.iter().filter(|p| p.action == action);

    match scope.filter(|s| !s.is_empty()) {
        None => {
            if held.next().is_some() {
                Ok(())
            } else {
                Err(AuthzError::Forbidden {
                    action: action.to_string(),
                })
            }
        }
        Some(scope) => {
            if held.any(|p| p.covers_scope(scope)) {
                Ok(())
            } else {
                Err(AuthzError::ForbiddenScope {
                    action: action.to_string(),
                    scope: scope.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held() -> Vec<Permission> {
        vec![
            Permission::new("dashboards:read", "dashboards:*"),
            Permission::new("folders:read", "folders:uid:general"),
            Permission::unscoped("orgs:create"),
        ]
    }

    #[test]
    fn wildcard_grant_covers_concrete_scope() {
        assert!(authorize(&held(), "dashboards:read", Some("dashboards:uid:abc")).is_ok());
        assert!(authorize(&held(), "folders:read", Some("folders:uid:general")).is_ok());
    }

    #[test]
    fn unscoped_check_needs_the_action() {
        assert!(authorize(&held(), "orgs:create", None).is_ok());
        assert!(authorize(&held(), "dashboards:read", None).is_ok());
        assert_eq!(
            authorize(&held(), "dashboards:write", None),
            Err(AuthzError::Forbidden {
                action: "dashboards:write".to_string()
            })
        );
    }

    #[test]
    fn scope_outside_grant_is_denied() {
        let err = authorize(&held(), "folders:read", Some("folders:uid:private")).unwrap_err();
        assert!(matches!(err, AuthzError::ForbiddenScope { .. }));
        assert!(authorize(&held(), "orgs:create", Some("orgs:id:1")).is_err());
    }
}
