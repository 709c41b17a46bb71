use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::GoogleConfig;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),
    #[error("identity provider returned no email")]
    MissingEmail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub verified_email: bool,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[async_trait]
pub trait GoogleIdentity: Send + Sync {
    fn auth_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError>;

    async fn user_info(&self, access_token: &str) -> Result<GoogleUserInfo, IdentityError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleOAuthClient {
    http: reqwest::Client,
    config: GoogleConfig,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuthClient {
    pub fn new(config: GoogleConfig) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            config,
            token_url: TOKEN_ENDPOINT.to_string(),
            userinfo_url: USERINFO_ENDPOINT.to_string(),
        })
    }

    /// Points the token and userinfo calls at another host.
    pub fn with_endpoints(mut self, token_url: &str, userinfo_url: &str) -> Self {
        self.token_url = token_url.to_string();
        self.userinfo_url = userinfo_url.to_string();
        self
    }
}

#[async_trait]
impl GoogleIdentity for GoogleOAuthClient {
    fn auth_url(&self, state: &str) -> String {
        let query = serde_urlencoded::to_string(&[
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("access_type", "offline"),
            ("state", state),
        ])
        .unwrap_or_default();
        format!("{}?{}", AUTH_ENDPOINT, query)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!("Google token exchange failed with {}: {}", status, body);
            return Err(IdentityError::Rejected(format!("token exchange returned {}", status)));
        }

        Ok(response.json::<TokenResponse>().await?.access_token)
    }

    async fn user_info(&self, access_token: &str) -> Result<GoogleUserInfo, IdentityError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdentityError::Rejected(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}
