use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Membership role inside a tenant, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Viewer,
    Engineer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "VIEWER",
            Role::Engineer => "ENGINEER",
            Role::Admin => "ADMIN",
        }
    }

    /// ENGINEER and ADMIN may mutate; VIEWER is read-only.
    pub fn can_write(self) -> bool {
        matches!(self, Role::Engineer | Role::Admin)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIEWER" => Ok(Role::Viewer),
            "ENGINEER" => Ok(Role::Engineer),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// Claims carried by the session token. Issued by the authentication
/// collaborator; this server only decodes and trusts them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub tenant_id: String,
    pub tenant_slug: String,
    pub exp: i64,
}

/// The single carrier of tenant identity through the data layer. Every
/// service operation requires one; constructing it is the only place a
/// request's tenant scope is decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: String,
    pub role: Role,
}

impl TenantContext {
    pub fn new(tenant_id: &str, user_id: &str, role: Role) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            role,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(!Role::Viewer.can_write());
        assert!(Role::Engineer.can_write());
        assert!(Role::Admin.can_write());
        assert!(Role::Admin.is_admin());
        assert!(!Role::Engineer.is_admin());
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Viewer, Role::Engineer, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("OPERATOR".parse::<Role>().is_err());
    }
}
