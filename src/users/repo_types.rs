use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed set of roles. Stored as the `user_role` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    /// Whether a caller holding `self` may run an operation gated on `required`.
    pub fn permits(self, required: Role) -> bool {
        match (self, required) {
            (Role::Admin, _) => true,
            (Role::User, Role::User) => true,
            (Role::User, Role::Admin) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// User record in the database.
#[derive(Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,                 // stored lowercased
    pub password_hash: Option<String>, // absent for federated-only accounts
    pub federated_id: Option<String>,  // Google subject id
    pub name: String,
    pub role: Role,
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("has_password", &self.password_hash.is_some())
            .field("federated_id", &self.federated_id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// How a new account authenticates. One of the two is always present.
#[derive(Clone)]
pub enum NewCredential {
    PasswordHash(String),
    Federated(String),
}

/// Fields for a user that does not exist yet.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub credential: NewCredential,
}

impl NewUser {
    pub fn password_hash(&self) -> Option<&str> {
        match &self.credential {
            NewCredential::PasswordHash(h) => Some(h),
            NewCredential::Federated(_) => None,
        }
    }

    pub fn federated_id(&self) -> Option<&str> {
        match &self.credential {
            NewCredential::Federated(id) => Some(id),
            NewCredential::PasswordHash(_) => None,
        }
    }
}

/// Password-free view of a user, attached to admitted requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub federated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for Identity {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            role: u.role,
            federated: u.federated_id.is_some(),
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct UserStats {
    pub total: i64,
    pub admins: i64,
    pub recent: i64,
}
