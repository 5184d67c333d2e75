//! Roles, permissions and the per-request caller identity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, StandardError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Manager,
    #[default]
    Sales,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadRecords,
    WriteCustomers,
    WriteProducts,
    WriteProposals,
    ApproveProposals,
    DeleteRecords,
    ManageUsers,
    ManageEntitlements,
}

impl UserRole {
    pub fn can(&self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            UserRole::Admin => true,
            UserRole::Manager => !matches!(permission, ManageUsers | ManageEntitlements),
            UserRole::Sales => matches!(
                permission,
                ReadRecords | WriteCustomers | WriteProposals
            ),
            UserRole::Viewer => permission == ReadRecords,
        }
    }
}

/// Who is calling, for which tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: UserRole,
}

impl RequestContext {
    pub fn new(user_id: Uuid, tenant_id: Uuid, role: UserRole) -> Self {
        Self {
            user_id,
            tenant_id,
            role,
        }
    }

    /// Fail with `AUTH.FORBIDDEN` unless the role grants `permission`
    pub fn require(&self, permission: Permission) -> Result<(), StandardError> {
        if self.role.can(permission) {
            return Ok(());
        }
        Err(StandardError::new(
            ErrorCode::Forbidden,
            format!("Role {:?} may not perform {:?}", self.role, permission),
        )
        .with("user_id", self.user_id)
        .with("tenant_id", self.tenant_id))
    }
}
