use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    auth::{
        google::{GoogleProvider, IdentityProvider},
        jwt::JwtKeys,
        session::{PgSessionStore, SessionAdapter, SessionStore},
    },
    config::AppConfig,
    users::repo::{PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub sessions: SessionAdapter,
    pub tokens: JwtKeys,
    /// `None` when Google credentials are not configured.
    pub identity: Option<Arc<dyn IdentityProvider>>,
}

impl AppState {
    pub fn init(config: AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let identity = match config.google.clone() {
            Some(google) => Some(Arc::new(GoogleProvider::new(google)?) as Arc<dyn IdentityProvider>),
            None => None,
        };
        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
        let sessions = Arc::new(PgSessionStore::new(db)) as Arc<dyn SessionStore>;
        Ok(Self::from_parts(Arc::new(config), users, sessions, identity))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        identity: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let tokens = JwtKeys::new(&config.jwt);
        let sessions = SessionAdapter::new(sessions, users.clone(), &config.session);
        Self {
            config,
            users,
            sessions,
            tokens,
            identity,
        }
    }
}
