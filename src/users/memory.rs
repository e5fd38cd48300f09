//! In-process `UserStore` used by unit tests.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, UserStore};
use super::repo_types::{NewUser, Role, User, UserFilter, UserPage, UserStats};

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub async fn count_federated(&self, federated_id: &str) -> usize {
        self.users
            .read()
            .await
            .values()
            .filter(|u| u.federated_id.as_deref() == Some(federated_id))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn remove(&self, id: Uuid) {
        self.users.write().await.remove(&id);
    }

    pub async fn set_role(&self, id: Uuid, role: Role) {
        if let Some(u) = self.users.write().await.get_mut(&id) {
            u.role = role;
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_federated_id(&self, federated_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.federated_id.as_deref() == Some(federated_id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        if let Some(fid) = new_user.federated_id() {
            if users.values().any(|u| u.federated_id.as_deref() == Some(fid)) {
                return Err(StoreError::Duplicate("federated_id"));
            }
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email.clone(),
            password_hash: new_user.password_hash().map(str::to_string),
            federated_id: new_user.federated_id().map(str::to_string),
            name: new_user.name.clone(),
            role: Role::User,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|stored| {
            stored.name = name.to_string();
            if let Some(hash) = password_hash {
                stored.password_hash = Some(hash.to_string());
            }
            stored.clone()
        }))
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|stored| {
            stored.role = role;
            stored.clone()
        }))
    }

    async fn list(&self, filter: &UserFilter) -> Result<UserPage, StoreError> {
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let mut matched: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| filter.role.map_or(true, |r| u.role == r))
            .filter(|u| {
                needle.as_deref().map_or(true, |n| {
                    u.name.to_lowercase().contains(n) || u.email.contains(n)
                })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as i64;
        let users = matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok(UserPage { users, total })
    }

    async fn stats(&self, recent_since: OffsetDateTime) -> Result<UserStats, StoreError> {
        let users = self.users.read().await;
        Ok(UserStats {
            total: users.len() as i64,
            admins: users.values().filter(|u| u.role == Role::Admin).count() as i64,
            recent: users
                .values()
                .filter(|u| u.created_at >= recent_since)
                .count() as i64,
        })
    }
}
