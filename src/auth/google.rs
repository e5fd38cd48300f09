use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::GoogleConfig;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const SCOPES: &str = "openid email profile";

/// Identity data returned by an external provider after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedProfile {
    pub subject: String,
    pub email: String,
    pub name: String,
}

/// An OAuth authorization-code provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL of the consent screen, carrying `state` for CSRF protection.
    fn authorize_url(&self, state: &str) -> String;
    /// Trades an authorization code for the caller's profile.
    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedProfile>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

pub struct GoogleProvider {
    http: reqwest::Client,
    authorize_base: Url,
    cfg: GoogleConfig,
}

impl GoogleProvider {
    pub fn new(cfg: GoogleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;
        let authorize_base = Url::parse(AUTHORIZE_URL).context("parse authorize url")?;
        Ok(Self {
            http,
            authorize_base,
            cfg,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> String {
        let mut url = self.authorize_base.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.cfg.client_id)
            .append_pair("redirect_uri", &self.cfg.callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("prompt", "select_account");
        url.into()
    }

    #[instrument(skip(self, code))]
    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedProfile> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("redirect_uri", self.cfg.callback_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("google token request")?
            .error_for_status()
            .context("google token response")?
            .json()
            .await
            .context("decode google token")?;

        let info: UserInfo = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("google userinfo request")?
            .error_for_status()
            .context("google userinfo response")?
            .json()
            .await
            .context("decode google userinfo")?;

        debug!(subject = %info.sub, "google profile fetched");
        profile_from(info)
    }
}

fn profile_from(info: UserInfo) -> anyhow::Result<FederatedProfile> {
    let email = info
        .email
        .filter(|e| !e.trim().is_empty())
        .context("google profile has no email")?;
    let name = info
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    Ok(FederatedProfile {
        subject: info.sub,
        email,
        name,
    })
}
