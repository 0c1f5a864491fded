use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{require, ServiceError};
use crate::auth::{AuthUser, Claims};
use crate::database::models::user::{Permission, Role, UserWithRole};

const SELECT_USER: &str = r#"
    SELECT p.*, COALESCE(r.role, 'worker') AS role
    FROM profiles p
    LEFT JOIN user_roles r ON r.user_id = p.id
"#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoleInput {
    pub role: Role,
}

pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures a profile exists for the token subject and resolves its role
    pub async fn resolve(&self, claims: &Claims) -> Result<AuthUser, ServiceError> {
        sqlx::query("INSERT INTO profiles (id, email) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(claims.sub)
            .bind(&claims.email)
            .execute(&self.pool)
            .await?;

        let role: Option<Role> = sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = $1")
            .bind(claims.sub)
            .fetch_optional(&self.pool)
            .await?;

        Ok(AuthUser { id: claims.sub, email: claims.email.clone(), role: role.unwrap_or_default() })
    }

    /// Upserts the caller's profile from the token and returns it with its role
    pub async fn current_user(&self, claims: &Claims) -> Result<UserWithRole, ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, email) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET email = COALESCE(EXCLUDED.email, profiles.email), updated_at = now()
            "#,
        )
        .bind(claims.sub)
        .bind(&claims.email)
        .execute(&self.pool)
        .await?;

        self.select_404(claims.sub).await
    }

    pub async fn select_404(&self, id: Uuid) -> Result<UserWithRole, ServiceError> {
        let sql = format!("{} WHERE p.id = $1", SELECT_USER);
        sqlx::query_as::<_, UserWithRole>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))
    }

    pub async fn select_any(&self, user: &AuthUser) -> Result<Vec<UserWithRole>, ServiceError> {
        require(user, Permission::ManageRoles)?;
        let sql = format!("{} ORDER BY p.created_at", SELECT_USER);
        Ok(sqlx::query_as::<_, UserWithRole>(&sql).fetch_all(&self.pool).await?)
    }

    /// Admin-only role change. Admins cannot demote themselves.
    pub async fn set_role(&self, user: &AuthUser, target: Uuid, role: Role) -> Result<UserWithRole, ServiceError> {
        require(user, Permission::ManageRoles)?;
        if target == user.id && role != Role::Admin {
            return Err(ServiceError::Conflict("Administrators cannot remove their own admin role".to_string()));
        }
        self.assign_role(target, role).await
    }

    /// Writes the role row without a permission check (CLI bootstrap)
    pub async fn assign_role(&self, target: Uuid, role: Role) -> Result<UserWithRole, ServiceError> {
        self.select_404(target).await?;
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET role = EXCLUDED.role, updated_at = now()
            "#,
        )
        .bind(target)
        .bind(role)
        .execute(&self.pool)
        .await?;

        tracing::info!("User {} is now {}", target, role);
        self.select_404(target).await
    }
}
