//! Server-side login sessions.
//!
//! The session row only holds the user id. Every request that arrives with a
//! session cookie re-reads the user from the credential store, so a removed
//! account turns the session anonymous instead of failing the request.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, SameSite};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::services::random_token;
use crate::{
    config::{SessionConfig, MAX_SESSION_TTL_HOURS},
    users::{
        repo::{StoreError, UserStore},
        repo_types::{Identity, User},
    },
};

pub const SESSION_COOKIE: &str = "session_id";
const SESSION_ID_LEN: usize = 43;

/// What a session remembers about its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPrincipal {
    pub user_id: Uuid,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        id: &str,
        principal: SessionPrincipal,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// Live (unexpired) session for `id`.
    async fn find(&self, id: &str, now: OffsetDateTime) -> anyhow::Result<Option<SessionPrincipal>>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    /// Drops every session that expired at or before `now`. Returns how many.
    async fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        id: &str,
        principal: SessionPrincipal,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(principal.user_id)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .context("insert session")?;
        Ok(())
    }

    async fn find(&self, id: &str, now: OffsetDateTime) -> anyhow::Result<Option<SessionPrincipal>> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM sessions
            WHERE id = $1 AND expires_at > $2
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("find session")?;
        Ok(user_id.map(|user_id| SessionPrincipal { user_id }))
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete session")?;
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await
            .context("purge expired sessions")?;
        Ok(done.rows_affected())
    }
}

#[derive(Clone)]
pub struct SessionAdapter {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    ttl: Duration,
    cookie_secure: bool,
}

impl SessionAdapter {
    pub fn new(store: Arc<dyn SessionStore>, users: Arc<dyn UserStore>, cfg: &SessionConfig) -> Self {
        Self {
            store,
            users,
            ttl: Duration::hours(cfg.ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS)),
            cookie_secure: cfg.cookie_secure,
        }
    }

    pub fn serialize(user: &User) -> SessionPrincipal {
        SessionPrincipal { user_id: user.id }
    }

    /// `None` when the user behind the session no longer exists.
    pub async fn deserialize(
        &self,
        principal: SessionPrincipal,
    ) -> Result<Option<Identity>, StoreError> {
        let user = self.users.find_by_id(principal.user_id).await?;
        if user.is_none() {
            debug!(user_id = %principal.user_id, "session user no longer exists");
        }
        Ok(user.map(Identity::from))
    }

    /// Stores a new session for `user` and returns its id. Expired sessions
    /// are swept on the way.
    pub async fn establish(&self, user: &User) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        match self.store.purge_expired(now).await {
            Ok(0) => {}
            Ok(n) => debug!(purged = n, "expired sessions removed"),
            Err(e) => warn!(error = ?e, "session purge failed"),
        }

        let id = random_token(SESSION_ID_LEN);
        let expires_at = now
            .checked_add(self.ttl)
            .context("session expiry out of range")?;
        self.store
            .create(&id, Self::serialize(user), expires_at)
            .await?;
        info!(user_id = %user.id, "session established");
        Ok(id)
    }

    pub async fn principal(&self, session_id: &str) -> anyhow::Result<Option<SessionPrincipal>> {
        self.store.find(session_id, OffsetDateTime::now_utc()).await
    }

    pub async fn destroy(&self, session_id: &str) -> anyhow::Result<()> {
        self.store.delete(session_id).await
    }

    pub fn cookie(&self, session_id: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, session_id))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie_secure)
            .max_age(self.ttl)
            .build()
    }

    pub fn removal_cookie() -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, "")).path("/").build()
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    pub struct MemorySessionStore {
        sessions: RwLock<HashMap<String, (SessionPrincipal, OffsetDateTime)>>,
    }

    impl MemorySessionStore {
        pub async fn len(&self) -> usize {
            self.sessions.read().await.len()
        }
    }

    #[async_trait]
    impl SessionStore for MemorySessionStore {
        async fn create(
            &self,
            id: &str,
            principal: SessionPrincipal,
            expires_at: OffsetDateTime,
        ) -> anyhow::Result<()> {
            self.sessions
                .write()
                .await
                .insert(id.to_string(), (principal, expires_at));
            Ok(())
        }

        async fn find(
            &self,
            id: &str,
            now: OffsetDateTime,
        ) -> anyhow::Result<Option<SessionPrincipal>> {
            Ok(self
                .sessions
                .read()
                .await
                .get(id)
                .filter(|(_, expires_at)| *expires_at > now)
                .map(|(p, _)| *p))
        }

        async fn delete(&self, id: &str) -> anyhow::Result<()> {
            self.sessions.write().await.remove(id);
            Ok(())
        }

        async fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
            let mut sessions = self.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|_, (_, expires_at)| *expires_at > now);
            Ok((before - sessions.len()) as u64)
        }
    }
}
