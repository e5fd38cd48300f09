use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, Role, User, UserFilter, UserPage, UserStats};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key is already taken. Carries the field name.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Access to persisted users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_federated_id(&self, federated_id: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;
    /// Sets the name and, when given, the password hash. Role is never written.
    /// `None` when the user does not exist.
    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<User>, StoreError>;
    /// Sets only the role. `None` when the user does not exist.
    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError>;
    async fn list(&self, filter: &UserFilter) -> Result<UserPage, StoreError>;
    async fn stats(&self, recent_since: OffsetDateTime) -> Result<UserStats, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn classify(e: sqlx::Error, what: &'static str) -> StoreError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some("users_email_key") => return StoreError::Duplicate("email"),
                Some("users_federated_id_key") => return StoreError::Duplicate("federated_id"),
                _ => {}
            }
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context(what))
}

fn search_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, federated_id, name, role, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| classify(e, "find user by email"))
    }

    async fn find_by_federated_id(&self, federated_id: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, federated_id, name, role, created_at
            FROM users
            WHERE federated_id = $1
            "#,
        )
        .bind(federated_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| classify(e, "find user by federated id"))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, federated_id, name, role, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| classify(e, "find user by id"))
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, federated_id, name, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, password_hash, federated_id, name, role, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_user.email)
        .bind(new_user.password_hash())
        .bind(new_user.federated_id())
        .bind(&new_user.name)
        .bind(Role::User)
        .fetch_one(&self.db)
        .await
        .map_err(|e| classify(e, "insert user"))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = $2, password_hash = COALESCE($3, password_hash)
            WHERE id = $1
            RETURNING id, email, password_hash, federated_id, name, role, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| classify(e, "update profile"))
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET role = $2
            WHERE id = $1
            RETURNING id, email, password_hash, federated_id, name, role, created_at
            "#,
        )
        .bind(id)
        .bind(role)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| classify(e, "update role"))
    }

    async fn list(&self, filter: &UserFilter) -> Result<UserPage, StoreError> {
        let pattern = filter.search.as_deref().map(search_pattern);

        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, federated_id, name, role, created_at
            FROM users
            WHERE ($1::user_role IS NULL OR role = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.role)
        .bind(pattern.as_deref())
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.db)
        .await
        .map_err(|e| classify(e, "list users"))?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM users
            WHERE ($1::user_role IS NULL OR role = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2)
            "#,
        )
        .bind(filter.role)
        .bind(pattern.as_deref())
        .fetch_one(&self.db)
        .await
        .context("count users")?;

        Ok(UserPage { users, total })
    }

    async fn stats(&self, recent_since: OffsetDateTime) -> Result<UserStats, StoreError> {
        let (total, admins, recent): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE role = 'admin'),
                   COUNT(*) FILTER (WHERE created_at >= $1)
            FROM users
            "#,
        )
        .bind(recent_since)
        .fetch_one(&self.db)
        .await
        .context("user stats")?;

        Ok(UserStats {
            total,
            admins,
            recent,
        })
    }
}
