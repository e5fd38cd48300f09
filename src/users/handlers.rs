use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ListQuery, ProfileResponse, ProfileUpdate, RoleUpdate, StatsResponse, UserListResponse},
    repo_types::{Identity, Role, UserFilter},
};
use crate::{
    auth::{
        extractors::{AdminUser, CurrentUser},
        password::hash_password,
        services::{validate_name, validate_password},
    },
    error::{AppError, AppJson},
    state::AppState,
};

const RECENT_WINDOW: Duration = Duration::days(30);

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/profile", put(update_profile))
        .route("/users/stats/summary", get(stats_summary))
        .route("/users/:id", get(get_user))
        .route("/users/:id/role", put(update_role))
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation("id", "Invalid user id"))
}

/// Self-service update of name and, optionally, password. Never touches role.
#[instrument(skip(state, caller, payload), fields(user_id = %caller.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    AppJson(payload): AppJson<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, AppError> {
    let name = validate_name(&payload.name)?;
    let new_hash = match payload.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password).await?)
        }
        None => None,
    };

    let saved = state
        .users
        .update_profile(caller.id, &name, new_hash.as_deref())
        .await?
        .ok_or(AppError::Unauthorized("User not found"))?;
    info!("profile updated");
    Ok(Json(ProfileResponse {
        user: saved.into(),
    }))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.id))]
pub async fn update_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    AppJson(payload): AppJson<RoleUpdate>,
) -> Result<Json<Identity>, AppError> {
    let target_id = parse_id(&id)?;
    if target_id == admin.id {
        warn!("admin tried to change own role");
        return Err(AppError::validation(
            "id",
            "Administrators cannot change their own role",
        ));
    }
    let role: Role = payload
        .role
        .parse()
        .map_err(|e: String| AppError::validation("role", e))?;

    let saved = state
        .users
        .update_role(target_id, role)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;
    info!(user_id = %saved.id, role = %saved.role, "role changed");
    Ok(Json(saved.into()))
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<UserListResponse>, AppError> {
    let role = match query.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Some(
            raw.parse::<Role>()
                .map_err(|e| AppError::validation("role", e))?,
        ),
        None => None,
    };
    let (page, limit) = (query.page(), query.limit());
    let filter = UserFilter {
        role,
        search: query.search().map(str::to_string),
        limit,
        offset: (page - 1).saturating_mul(limit),
    };

    let result = state.users.list(&filter).await?;
    Ok(Json(UserListResponse {
        users: result.users.into_iter().map(Identity::from).collect(),
        current_page: page,
        total_pages: (result.total + limit - 1) / limit,
        total_users: result.total,
    }))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Identity>, AppError> {
    let id = parse_id(&id)?;
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, _admin))]
pub async fn stats_summary(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<StatsResponse>, AppError> {
    let now = OffsetDateTime::now_utc();
    let stats = state.users.stats(now - RECENT_WINDOW).await?;
    Ok(Json(StatsResponse {
        total_users: stats.total,
        total_admins: stats.admins,
        recent_users: stats.recent,
        last_updated: now.format(&Rfc3339).map_err(anyhow::Error::from)?,
    }))
}
