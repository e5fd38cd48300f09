use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use serde::Deserialize;
use time::Duration;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, PublicUser, RegisterRequest, VerifyAdminResponse,
            VerifyResponse,
        },
        extractors::CurrentUser,
        federated,
        services::{authenticate_local, random_token, register_local},
        session::{SessionAdapter, SESSION_COOKIE},
    },
    error::{AppError, AppJson},
    state::AppState,
    users::repo_types::Role,
};

const OAUTH_STATE_COOKIE: &str = "oauth_state";
const GOOGLE_DISABLED: &str = "Google authentication is not configured";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/google", get(google_start))
        .route("/auth/google/callback", get(google_callback))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/verify", get(verify))
        .route("/auth/verify-admin", get(verify_admin))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let user = register_local(state.users.as_ref(), payload).await?;
    let token = state.tokens.issue(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = authenticate_local(state.users.as_ref(), &payload.email, &payload.password).await?;
    let token = state.tokens.issue(user.id)?;
    Ok(Json(AuthResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

/// Ends the cookie session. Bearer tokens stay valid until they expire.
#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value()).await?;
        info!("session destroyed");
    }
    Ok((
        jar.remove(SessionAdapter::removal_cookie()),
        StatusCode::NO_CONTENT,
    ))
}

#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}

#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn verify(CurrentUser(user): CurrentUser) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user: PublicUser::from(&user),
    })
}

#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn verify_admin(CurrentUser(user): CurrentUser) -> Json<VerifyAdminResponse> {
    let is_admin = match user.role {
        Role::Admin => true,
        Role::User => false,
    };
    Json(VerifyAdminResponse { is_admin })
}

#[instrument(skip(state, jar))]
pub async fn google_start(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    let provider = state
        .identity
        .as_ref()
        .ok_or(AppError::NotConfigured(GOOGLE_DISABLED))?;

    let csrf = random_token(32);
    let url = provider.authorize_url(&csrf);
    let cookie = Cookie::build((OAUTH_STATE_COOKIE, csrf))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.session.cookie_secure)
        .max_age(Duration::minutes(10))
        .build();
    Ok((jar.add(cookie), Redirect::to(&url)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[instrument(skip(state, jar, params))]
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect), AppError> {
    let provider = state
        .identity
        .as_ref()
        .ok_or(AppError::NotConfigured(GOOGLE_DISABLED))?;
    let frontend = state.config.frontend_url.as_str();

    let expected = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build((OAUTH_STATE_COOKIE, "")).path("/"));

    if let Some(error) = params.error {
        warn!(%error, "provider returned an error");
        return Ok((
            jar,
            Redirect::to(&format!("{frontend}/login?error=google_auth_failed")),
        ));
    }

    match (expected, params.state) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => {
            warn!("oauth state mismatch");
            return Err(AppError::Unauthorized("Invalid OAuth state"));
        }
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::validation("code", "Missing authorization code"))?;

    let profile = provider.exchange(&code).await?;
    let user = match federated::resolve(state.users.as_ref(), &profile).await {
        Ok(user) => user,
        Err(AppError::Validation { message, .. }) => {
            let reason = if message == federated::EMAIL_TAKEN {
                "account_exists"
            } else {
                "google_auth_failed"
            };
            return Ok((
                jar,
                Redirect::to(&format!("{frontend}/login?error={reason}")),
            ));
        }
        Err(e) => return Err(e),
    };

    let token = state.tokens.issue(user.id)?;
    let session_id = state.sessions.establish(&user).await?;
    info!(user_id = %user.id, "google sign-in completed");
    Ok((
        jar.add(state.sessions.cookie(session_id)),
        Redirect::to(&format!("{frontend}/dashboard?token={token}")),
    ))
}
