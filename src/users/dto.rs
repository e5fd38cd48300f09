use serde::{Deserialize, Serialize};

use super::repo_types::Identity;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: String,
}

/// Query string of the admin listing. Values are kept raw so that junk
/// falls back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub role: Option<String>,
    pub search: Option<String>,
}

fn positive(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse::<i64>().ok()).filter(|v| *v > 0)
}

impl ListQuery {
    pub fn page(&self) -> i64 {
        positive(self.page.as_deref()).unwrap_or(1)
    }

    pub fn limit(&self) -> i64 {
        positive(self.limit.as_deref())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: Identity,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListResponse {
    pub users: Vec<Identity>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_users: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_users: i64,
    pub total_admins: i64,
    pub recent_users: i64,
    pub last_updated: String,
}
