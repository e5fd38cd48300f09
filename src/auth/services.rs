use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tracing::{info, warn};

use super::{dto::RegisterRequest, password};
use crate::{
    error::AppError,
    users::{
        repo::{StoreError, UserStore},
        repo_types::{NewCredential, NewUser, User},
    },
};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_NAME_LEN: usize = 2;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"(?-u)^\w+([.-]?\w+)*@\w+([.-]?\w+)*(\.\w{2,3})+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Returns the trimmed name or a field-level validation error.
pub(crate) fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(AppError::validation(
            "name",
            format!("Name must be at least {MIN_NAME_LEN} characters"),
        ));
    }
    Ok(name.to_string())
}

pub(crate) fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(
            "password",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

/// Random alphanumeric string for session ids and OAuth state.
pub(crate) fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Validates input, hashes the password and creates a local account.
pub async fn register_local(users: &dyn UserStore, req: RegisterRequest) -> Result<User, AppError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::validation("email", "Invalid email address"));
    }
    let name = validate_name(&req.name)?;
    validate_password(&req.password)?;

    if users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::validation("email", "User already registered"));
    }

    let hash = password::hash_password(&req.password).await?;
    let user = users
        .create(NewUser {
            email,
            name,
            credential: NewCredential::PasswordHash(hash),
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate("email") => {
                AppError::validation("email", "User already registered")
            }
            other => other.into(),
        })?;

    info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Checks email/password. Every failure answers the same 401.
pub async fn authenticate_local(
    users: &dyn UserStore,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let email = normalize_email(email);
    let Some(user) = users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
    };

    let Some(digest) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "login on account without password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
    };

    match password::verify_password(password, digest).await {
        Ok(true) => {
            info!(user_id = %user.id, "user logged in");
            Ok(user)
        }
        Ok(false) => {
            warn!(user_id = %user.id, "login invalid password");
            Err(AppError::Unauthorized(INVALID_CREDENTIALS))
        }
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "stored digest unusable");
            Err(AppError::Unauthorized(INVALID_CREDENTIALS))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::memory::MemoryUserStore;

    fn mario() -> RegisterRequest {
        RegisterRequest {
            name: "Mario Rossi".into(),
            email: "Mario@Example.com ".into(),
            password: "secret1".into(),
        }
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("mario@example.com"));
        assert!(is_valid_email("mario.rossi@mail.example.it"));
        assert!(!is_valid_email("mario@"));
        assert!(!is_valid_email("mario example@x.com"));
        assert!(!is_valid_email("mario@example.c"));
        // word characters are ASCII only
        assert!(!is_valid_email("mário@example.com"));
        assert!(!is_valid_email("mario@exämple.com"));
    }

    #[test]
    fn short_name_and_password_rejected() {
        assert!(validate_name(" A ").is_err());
        assert_eq!(validate_name("  Al ").unwrap(), "Al");
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }

    #[test]
    fn random_tokens_differ() {
        let a = random_token(43);
        assert_eq!(a.len(), 43);
        assert_ne!(a, random_token(43));
    }

    #[tokio::test]
    async fn register_stores_hash_not_plaintext() {
        let store = MemoryUserStore::default();
        let user = register_local(&store, mario()).await.expect("register");
        assert_eq!(user.email, "mario@example.com");
        let digest = user.password_hash.clone().expect("hash stored");
        assert_ne!(digest, "secret1");
        assert!(password::verify_password("secret1", &digest).await.unwrap());
        assert!(!password::verify_password("secret2", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_email_is_validation_error() {
        let store = MemoryUserStore::default();
        register_local(&store, mario()).await.unwrap();
        let err = register_local(&store, mario()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "email", .. }));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let store = MemoryUserStore::default();
        register_local(&store, mario()).await.unwrap();

        let unknown = authenticate_local(&store, "nobody@example.com", "secret1")
            .await
            .unwrap_err();
        let wrong = authenticate_local(&store, "mario@example.com", "nope")
            .await
            .unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, AppError::Unauthorized(_)));
        assert!(matches!(wrong, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn login_is_case_insensitive_on_email() {
        let store = MemoryUserStore::default();
        register_local(&store, mario()).await.unwrap();
        let user = authenticate_local(&store, "MARIO@example.COM", "secret1")
            .await
            .expect("login");
        assert_eq!(user.name, "Mario Rossi");
    }

    #[tokio::test]
    async fn federated_account_cannot_password_login() {
        let store = MemoryUserStore::default();
        store
            .create(NewUser {
                email: "g@example.com".into(),
                name: "Giulia".into(),
                credential: NewCredential::Federated("google-1".into()),
            })
            .await
            .unwrap();
        let err = authenticate_local(&store, "g@example.com", "").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
