use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::ShepherdError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    StageView,
    StageCreate,
    StageUpdate,
    StageDelete,
    RuleManage,
    MemberView,
    MemberCreate,
    MemberUpdate,
    MemberDelete,
    TaskView,
    TaskCreate,
    TaskUpdate,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Role {
    Admin,
    Leader,
    Volunteer,
}

impl Role {
    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Admin => &[
                StageView,
                StageCreate,
                StageUpdate,
                StageDelete,
                RuleManage,
                MemberView,
                MemberCreate,
                MemberUpdate,
                MemberDelete,
                TaskView,
                TaskCreate,
                TaskUpdate,
            ],
            Role::Leader => &[
                StageView,
                MemberView,
                MemberCreate,
                MemberUpdate,
                TaskView,
                TaskCreate,
                TaskUpdate,
            ],
            Role::Volunteer => &[StageView, MemberView, MemberUpdate, TaskView, TaskUpdate],
        }
    }
}

/// The authenticated caller. Every core operation is scoped to
/// `tenant_id`; the tenant is never taken from the request body.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
}

impl Principal {
    /// Construct from validated JWT claims at the server boundary.
    pub fn from_jwt_claims(claims: &JwtClaims) -> Result<Self, ShepherdError> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ShepherdError::Unauthorized("sub claim is not a user id".into()))?;
        let tenant_id = Uuid::parse_str(&claims.tenant_id)
            .map_err(|_| ShepherdError::Unauthorized("tenant_id claim is not a uuid".into()))?;
        let role = Role::from_str(&claims.role)
            .map_err(|_| ShepherdError::Unauthorized(format!("unknown role '{}'", claims.role)))?;
        Ok(Self {
            user_id,
            tenant_id,
            role,
        })
    }

    /// Construct explicitly for in-process callers and tests.
    pub fn in_process(user_id: Uuid, tenant_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            tenant_id,
            role,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.role.permissions().contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), ShepherdError> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(ShepherdError::Forbidden(format!(
                "role {} lacks {}",
                self.role, permission
            )))
        }
    }
}

/// JWT claims shape expected from the identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub tenant_id: String,
    pub role: String,
}
