use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    Role: "role" {
        Admin => "admin",
        Manager => "manager",
        Worker => "worker",
    }
}

impl Default for Role {
    /// Users without a `user_roles` row act as workers
    fn default() -> Self {
        Role::Worker
    }
}

/// Actions checked server-side before a service call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ViewRecords,
    EditRecords,
    ChangeClientStatus,
    SendProtocols,
    CompleteProtocols,
    DeleteProtocols,
    ManageUserTemplates,
    ManageGenericTemplates,
    ManageSettings,
    ManageRoles,
}

impl Role {
    pub fn can(&self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => true,
            Role::Manager => !matches!(permission, ManageGenericTemplates | ManageSettings | ManageRoles),
            Role::Worker => matches!(permission, ViewRecords | EditRecords),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile joined with its role
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserWithRole {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub profile: Profile,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_matrix() {
        use Permission::*;
        let all = [
            ViewRecords,
            EditRecords,
            ChangeClientStatus,
            SendProtocols,
            CompleteProtocols,
            DeleteProtocols,
            ManageUserTemplates,
            ManageGenericTemplates,
            ManageSettings,
            ManageRoles,
        ];
        assert!(all.iter().all(|p| Role::Admin.can(*p)));

        assert!(Role::Manager.can(SendProtocols));
        assert!(Role::Manager.can(ManageUserTemplates));
        assert!(!Role::Manager.can(ManageSettings));
        assert!(!Role::Manager.can(ManageGenericTemplates));

        assert!(Role::Worker.can(EditRecords));
        assert!(!Role::Worker.can(ChangeClientStatus));
        assert!(!Role::Worker.can(DeleteProtocols));
        assert!(!Role::Worker.can(ManageUserTemplates));
    }

    #[test]
    fn default_role_is_worker() {
        assert_eq!(Role::default(), Role::Worker);
    }
}
