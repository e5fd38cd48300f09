use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

/// Google OAuth client credentials. Absent when either id or secret is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

/// Upper bound for `SESSION_TTL_HOURS`: one year.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_hours: i64,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub google: Option<GoogleConfig>,
    pub session: SessionConfig,
    pub frontend_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, so tests never touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "booking-backend".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "booking-users".into()),
        };

        let backend_url = var("BACKEND_URL").unwrap_or_else(|| "http://localhost:5001".into());
        let google = match (var("GOOGLE_CLIENT_ID"), var("GOOGLE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(GoogleConfig {
                client_id,
                client_secret,
                callback_url: var("GOOGLE_CALLBACK_URL").unwrap_or_else(|| {
                    format!(
                        "{}/api/auth/google/callback",
                        backend_url.trim_end_matches('/')
                    )
                }),
            }),
            _ => {
                warn!("GOOGLE_CLIENT_ID or GOOGLE_CLIENT_SECRET missing; Google sign-in disabled");
                None
            }
        };

        let ttl_hours = var("SESSION_TTL_HOURS")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(24);
        if ttl_hours > MAX_SESSION_TTL_HOURS {
            bail!("SESSION_TTL_HOURS must be at most {MAX_SESSION_TTL_HOURS}, got {ttl_hours}");
        }
        let session = SessionConfig {
            ttl_hours,
            cookie_secure: var("APP_ENV").as_deref() == Some("production"),
        };

        let frontend_url = var("FRONTEND_URL")
            .unwrap_or_else(|| "http://localhost:3000".into())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url,
            jwt,
            google,
            session,
            frontend_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_jwt_secret_refuses_to_start() {
        let err = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn blank_jwt_secret_counts_as_missing() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "   "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn google_disabled_when_secret_missing() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("GOOGLE_CLIENT_ID", "id"),
        ]))
        .expect("config");
        assert!(cfg.google.is_none());
    }

    #[test]
    fn google_callback_defaults_to_backend_url() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("GOOGLE_CLIENT_ID", "id"),
            ("GOOGLE_CLIENT_SECRET", "secret"),
            ("BACKEND_URL", "https://api.example.com/"),
        ]))
        .expect("config");
        let google = cfg.google.expect("google enabled");
        assert_eq!(
            google.callback_url,
            "https://api.example.com/api/auth/google/callback"
        );
    }

    #[test]
    fn oversized_session_ttl_refuses_to_start() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("SESSION_TTL_HOURS", "1000000000"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SESSION_TTL_HOURS"));

        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("SESSION_TTL_HOURS", "8760"),
        ]))
        .expect("one year is accepted");
        assert_eq!(cfg.session.ttl_hours, MAX_SESSION_TTL_HOURS);
    }

    #[test]
    fn defaults_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("SESSION_TTL_HOURS", "nope"),
        ]))
        .expect("config");
        assert_eq!(cfg.jwt.issuer, "booking-backend");
        assert_eq!(cfg.session.ttl_hours, 24);
        assert!(!cfg.session.cookie_secure);
        assert_eq!(cfg.frontend_url, "http://localhost:3000");
    }
}
