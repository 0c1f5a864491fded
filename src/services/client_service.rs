use sqlx::PgPool;
use uuid::Uuid;

use super::{merge_optional, require, ServiceError};
use crate::auth::AuthUser;
use crate::database::models::client::{is_valid_email, Client, ClientInput, ClientOverview, ClientStatus, CLIENT_OVERVIEW};
use crate::database::models::user::Permission;
use crate::database::{DatabaseError, Repository};
use crate::filter::FilterData;

pub struct ClientService {
    pool: PgPool,
}

impl ClientService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn overview(&self) -> Repository<ClientOverview> {
        Repository::new(CLIENT_OVERVIEW, self.pool.clone())
    }

    pub async fn select_any(&self, filter: FilterData) -> Result<Vec<ClientOverview>, ServiceError> {
        Ok(self.overview().select_any(filter).await?)
    }

    pub async fn select_404(&self, id: Uuid) -> Result<ClientOverview, ServiceError> {
        self.overview().select_id(id).await.map_err(|e| match e {
            DatabaseError::NotFound(_) => ServiceError::NotFound(format!("Client {} not found", id)),
            other => other.into(),
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<Client, ServiceError> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Client {} not found", id)))
    }

    /// Creates a client. Names and e-mails are deliberately not unique.
    pub async fn create_one(&self, user: &AuthUser, input: ClientInput) -> Result<Client, ServiceError> {
        require(user, Permission::EditRecords)?;
        let input = input.normalized();
        let name = input.name.ok_or_else(|| ServiceError::validation("name", "Name is required"))?;
        check_email(input.email.as_deref())?;

        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (name, email, phone, address, company_name, tax_id, registration_number, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .bind(&input.company_name)
        .bind(&input.tax_id)
        .bind(&input.registration_number)
        .bind(user.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Client {} created by {}", client.id, user.id);
        Ok(client)
    }

    /// Partial update: absent fields are kept, blank optional fields are cleared
    pub async fn update_404(&self, user: &AuthUser, id: Uuid, input: ClientInput) -> Result<Client, ServiceError> {
        require(user, Permission::EditRecords)?;
        let current = self.fetch(id).await?;

        let name = match input.name {
            Some(name) if name.trim().is_empty() => return Err(ServiceError::validation("name", "Name cannot be empty")),
            Some(name) => name.trim().to_string(),
            None => current.name,
        };
        let email = merge_optional(current.email, input.email);
        check_email(email.as_deref())?;

        let client = sqlx::query_as::<_, Client>(
            r#"
            UPDATE clients
            SET name = $2, email = $3, phone = $4, address = $5, company_name = $6,
                tax_id = $7, registration_number = $8, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(&email)
        .bind(merge_optional(current.phone, input.phone))
        .bind(merge_optional(current.address, input.address))
        .bind(merge_optional(current.company_name, input.company_name))
        .bind(merge_optional(current.tax_id, input.tax_id))
        .bind(merge_optional(current.registration_number, input.registration_number))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Client {} not found", id)))?;

        Ok(client)
    }

    pub async fn set_status(&self, user: &AuthUser, id: Uuid, status: ClientStatus) -> Result<Client, ServiceError> {
        require(user, Permission::ChangeClientStatus)?;
        let client = sqlx::query_as::<_, Client>(
            "UPDATE clients SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Client {} not found", id)))?;

        tracing::info!("Client {} set {} by {}", id, status, user.id);
        Ok(client)
    }
}

fn check_email(email: Option<&str>) -> Result<(), ServiceError> {
    match email {
        Some(email) if !is_valid_email(email) => Err(ServiceError::validation("email", "Invalid e-mail address")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_only_checked_when_present() {
        assert!(check_email(None).is_ok());
        assert!(check_email(Some("biuro@firma.pl")).is_ok());
        assert!(matches!(check_email(Some("biuro")), Err(ServiceError::Validation { .. })));
    }

    use crate::database::models::user::Role;
    use crate::testing::{self, TestContext};

    #[tokio::test]
    async fn duplicate_names_and_emails_are_accepted() {
        let Some(ctx) = TestContext::new().await else { return };
        let admin = testing::user(Role::Admin);
        let input = ClientInput {
            name: Some("Jan Kowalski".into()),
            email: Some("jan@example.com".into()),
            ..Default::default()
        };

        let first = ctx.state.clients().create_one(&admin, input.clone()).await.unwrap();
        let second = ctx.state.clients().create_one(&admin, input).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.name, second.name);
        assert_eq!(first.email, second.email);
    }

    #[tokio::test]
    async fn blank_fields_clear_and_missing_fields_keep() {
        let Some(ctx) = TestContext::new().await else { return };
        let admin = testing::user(Role::Admin);
        let input = ClientInput {
            name: Some("Anna Nowak".into()),
            phone: Some("+48 600 100 200".into()),
            address: Some("ul. Długa 1, Gdańsk".into()),
            ..Default::default()
        };
        let client = ctx.state.clients().create_one(&admin, input).await.unwrap();

        let patch = ClientInput { phone: Some("  ".into()), ..Default::default() };
        let updated = ctx.state.clients().update_404(&admin, client.id, patch).await.unwrap();
        assert_eq!(updated.name, "Anna Nowak");
        assert_eq!(updated.phone, None);
        assert_eq!(updated.address.as_deref(), Some("ul. Długa 1, Gdańsk"));
    }

    #[tokio::test]
    async fn only_elevated_roles_change_status() {
        let Some(ctx) = TestContext::new().await else { return };
        let client = testing::create_client(&ctx.state, None).await;

        let err = ctx
            .state
            .clients()
            .set_status(&testing::user(Role::Worker), client.id, ClientStatus::Inactive)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
