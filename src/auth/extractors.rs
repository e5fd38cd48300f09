use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use tracing::warn;
use uuid::Uuid;

use super::session::SESSION_COOKIE;
use crate::{
    error::AppError,
    state::AppState,
    users::repo_types::{Identity, Role},
};

/// Caller credential found on a request.
#[derive(Debug, PartialEq, Eq)]
enum Presented {
    Bearer(String),
    Session(String),
}

/// Bearer header first; the session cookie is only consulted when no header is sent.
fn extract(parts: &Parts) -> Result<Option<Presented>, AppError> {
    if let Some(value) = parts.headers.get(AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header"))?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized("Invalid Authorization header"))?;
        return Ok(Some(Presented::Bearer(token.to_string())));
    }
    let jar = CookieJar::from_headers(&parts.headers);
    Ok(jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .map(Presented::Session))
}

async fn load(state: &AppState, user_id: Uuid) -> Result<Identity, AppError> {
    match state.users.find_by_id(user_id).await? {
        Some(user) => Ok(user.into()),
        None => {
            warn!(%user_id, "token subject no longer exists");
            Err(AppError::Unauthorized("User not found"))
        }
    }
}

/// Resolves the caller for this request. Nothing is cached between requests,
/// so role changes apply on the next call.
pub async fn resolve_identity(state: &AppState, parts: &Parts) -> Result<Identity, AppError> {
    match extract(parts)? {
        None => Err(AppError::Unauthorized("Access denied. Missing token.")),
        Some(Presented::Bearer(token)) => {
            let claims = state.tokens.verify(&token).map_err(|e| {
                warn!(error = %e, "bearer token rejected");
                AppError::Unauthorized("Invalid or expired token")
            })?;
            load(state, claims.sub).await
        }
        Some(Presented::Session(id)) => {
            let principal = state
                .sessions
                .principal(&id)
                .await?
                .ok_or(AppError::Unauthorized("Session expired or invalid"))?;
            state
                .sessions
                .deserialize(principal)
                .await?
                .ok_or(AppError::Unauthorized("User not found"))
        }
    }
}

fn authorize(identity: Identity, required: Role) -> Result<Identity, AppError> {
    if identity.role.permits(required) {
        return Ok(identity);
    }
    warn!(user_id = %identity.id, role = %identity.role, required = %required, "role check failed");
    Err(AppError::Forbidden("Access denied. Admins only."))
}

/// Any authenticated caller.
pub struct CurrentUser(pub Identity);

/// Authenticated caller holding the admin role.
pub struct AdminUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let identity = resolve_identity(&state, parts).await?;
        authorize(identity, Role::User).map(CurrentUser)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let identity = resolve_identity(&state, parts).await?;
        authorize(identity, Role::Admin).map(AdminUser)
    }
}
