use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::google::{GoogleIdentity, IdentityError};
use super::password::{PasswordError, PasswordHasher};
use super::store::{OAuthStateStore, RefreshTokenStore, UserStore};
use super::telegram::{validate_init_data, TelegramError};
use super::tokens::{Claims, TokenError, TokenManager, TokenPair};
use crate::database::StoreError;
use crate::models::{Currency, NewUser, PublicUser, User, DEFAULT_CURRENCY};

const OAUTH_STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid or expired OAuth state")]
    InvalidState,
    #[error("Google account email is not verified")]
    UnverifiedEmail,
    #[error("Invalid or expired token")]
    InvalidToken { reason: String },
    #[error("Account is disabled")]
    Inactive,
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    Conflict,
    #[error("Invalid Telegram init data")]
    InvalidInitData(TelegramError),
    #[error("User not found")]
    NotFound,
    #[error("{0} sign-in is not configured")]
    NotConfigured(&'static str),
    #[error("Identity provider unavailable")]
    Identity(IdentityError),
    #[error("Internal error")]
    Internal(String),
}

impl AuthError {
    fn invalid_token(reason: impl Into<String>) -> Self {
        AuthError::InvalidToken {
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => AuthError::Conflict,
            StoreError::NotFound => AuthError::NotFound,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort => AuthError::Validation(err.to_string()),
            PasswordError::Hash(cause) => AuthError::Internal(cause),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(cause) => AuthError::Internal(cause),
            other => AuthError::invalid_token(other.to_string()),
        }
    }
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        AuthError::Identity(err)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub base_currency: Option<String>,
}

/// What every successful sign-in returns.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: PublicUser,
    pub tokens: TokenPair,
}

#[derive(Clone)]
struct TelegramSettings {
    bot_token: String,
    max_age: Option<Duration>,
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    oauth_states: Arc<dyn OAuthStateStore>,
    tokens: TokenManager,
    hasher: PasswordHasher,
    google: Option<Arc<dyn GoogleIdentity>>,
    telegram: Option<TelegramSettings>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        oauth_states: Arc<dyn OAuthStateStore>,
        tokens: TokenManager,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            users,
            refresh_tokens,
            oauth_states,
            tokens,
            hasher,
            google: None,
            telegram: None,
        }
    }

    pub fn with_google(mut self, google: Arc<dyn GoogleIdentity>) -> Self {
        self.google = Some(google);
        self
    }

    /// `max_age` of `None` accepts any `auth_date`.
    pub fn with_telegram(mut self, bot_token: impl Into<String>, max_age: Option<Duration>) -> Self {
        self.telegram = Some(TelegramSettings {
            bot_token: bot_token.into(),
            max_age,
        });
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub async fn register(&self, input: RegisterInput) -> Result<AuthSession, AuthError> {
        let email = input.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("A valid email is required".to_string()));
        }
        PasswordHasher::validate_policy(&input.password)?;

        let base_currency = match input.base_currency.as_deref() {
            Some(code) => Currency::from_str(code)
                .ok_or_else(|| AuthError::Validation(format!("Unsupported currency: {}", code)))?
                .into_string(),
            None => DEFAULT_CURRENCY.to_string(),
        };

        let password_hash = self.hasher.hash(&input.password).await?;
        let user = self
            .users
            .create_user(NewUser {
                email,
                password_hash: Some(password_hash),
                first_name: input.first_name,
                last_name: input.last_name,
                base_currency,
                ..Default::default()
            })
            .await?;

        info!("Registered user {}", user.id);
        self.issue_session(&user).await
    }

    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = self.users.find_by_email(email.trim()).await?;
        let hash = user.as_ref().and_then(|u| u.password_hash.as_deref());

        if !self.hasher.verify(password, hash).await {
            return Err(AuthError::InvalidCredentials);
        }
        let mut user = user.ok_or(AuthError::InvalidCredentials)?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        self.touch_login(&mut user).await?;
        self.issue_session(&user).await
    }

    /// Rotates a refresh token. The presented token is spent even if issuing
    /// the new pair fails afterwards.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        let now = Utc::now();

        let record = self
            .refresh_tokens
            .get_valid(refresh_token, now)
            .await?
            .ok_or_else(|| AuthError::invalid_token("refresh token is revoked, expired or unknown"))?;
        if record.user_id != claims.sub {
            return Err(AuthError::invalid_token("refresh token subject mismatch"));
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or_else(|| AuthError::invalid_token("refresh token owner no longer exists"))?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        if !self.refresh_tokens.revoke(refresh_token, now).await? {
            return Err(AuthError::invalid_token("refresh token was already rotated"));
        }

        self.issue_session(&user).await
    }

    /// Idempotent: unknown, revoked and expired tokens all succeed.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let revoked = self.refresh_tokens.revoke(refresh_token, Utc::now()).await?;
        if !revoked {
            tracing::debug!("Logout with an inactive refresh token");
        }
        Ok(())
    }

    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self.refresh_tokens.revoke_all_for_user(user_id).await?;
        info!("Revoked {} refresh tokens for user {}", revoked, user_id);
        Ok(revoked)
    }

    pub async fn google_auth_url(&self) -> Result<String, AuthError> {
        let google = self.google.as_ref().ok_or(AuthError::NotConfigured("Google"))?;
        let state = random_state();
        let expires_at = Utc::now() + ChronoDuration::minutes(OAUTH_STATE_TTL_MINUTES);
        self.oauth_states.put(&state, expires_at).await?;
        Ok(google.auth_url(&state))
    }

    pub async fn google_callback(&self, code: &str, state: &str) -> Result<AuthSession, AuthError> {
        let google = self.google.as_ref().ok_or(AuthError::NotConfigured("Google"))?;
        if !self.oauth_states.take(state, Utc::now()).await? {
            return Err(AuthError::InvalidState);
        }

        let access_token = google.exchange_code(code).await?;
        let info = google.user_info(&access_token).await?;
        let email = info
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or(AuthError::Identity(IdentityError::MissingEmail))?;

        // An unverified address proves nothing about who owns it
        let mut user = match self.users.find_by_google_id(&info.id).await? {
            Some(user) => user,
            None if !info.verified_email => return Err(AuthError::UnverifiedEmail),
            None => match self.users.find_by_email(&email).await? {
                Some(existing) if existing.google_id.as_deref().is_some_and(|id| id != info.id) => {
                    warn!("User {} is already linked to another Google account", existing.id);
                    return Err(AuthError::Conflict);
                }
                Some(existing) => {
                    info!("Linking Google account to user {}", existing.id);
                    self.users
                        .link_google(existing.id, &info.id, info.picture.as_deref())
                        .await?
                }
                None => {
                    self.users
                        .create_user(NewUser {
                            email,
                            google_id: Some(info.id.clone()),
                            first_name: info.given_name.clone(),
                            last_name: info.family_name.clone(),
                            avatar_url: info.picture.clone(),
                            base_currency: DEFAULT_CURRENCY.to_string(),
                            ..Default::default()
                        })
                        .await?
                }
            },
        };

        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        self.touch_login(&mut user).await?;
        self.issue_session(&user).await
    }

    pub async fn telegram_login(&self, init_data: &str) -> Result<AuthSession, AuthError> {
        let settings = self.telegram.as_ref().ok_or(AuthError::NotConfigured("Telegram"))?;
        let validated = validate_init_data(init_data, &settings.bot_token, settings.max_age, Utc::now())
            .map_err(AuthError::InvalidInitData)?;
        let tg = validated.user;

        let mut user = match self.users.find_by_telegram_id(tg.id).await? {
            Some(user) => user,
            None => {
                let user = self
                    .users
                    .create_user(NewUser {
                        email: format!("{}@telegram.user", Uuid::new_v4()),
                        telegram_id: Some(tg.id),
                        first_name: tg.first_name,
                        last_name: tg.last_name,
                        avatar_url: tg.photo_url,
                        base_currency: DEFAULT_CURRENCY.to_string(),
                        ..Default::default()
                    })
                    .await?;
                info!("Created user {} from Telegram", user.id);
                user
            }
        };

        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        self.touch_login(&mut user).await?;
        self.issue_session(&user).await
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(self.tokens.verify_access(token)?)
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        let user = self.users.find_by_id(user_id).await?.ok_or(AuthError::NotFound)?;
        Ok(PublicUser::from(&user))
    }

    /// Returns `(refresh_tokens, oauth_states)` removed.
    pub async fn purge_expired(&self) -> Result<(u64, u64), AuthError> {
        let now = Utc::now();
        let tokens = self.refresh_tokens.purge_expired(now).await?;
        let states = self.oauth_states.purge_expired(now).await?;
        Ok((tokens, states))
    }

    async fn touch_login(&self, user: &mut User) -> Result<(), AuthError> {
        let now = Utc::now();
        if let Err(e) = self.users.update_last_login(user.id, now).await {
            warn!("Failed to record login for user {}: {}", user.id, e);
            return Err(e.into());
        }
        user.last_login_at = Some(now);
        Ok(())
    }

    async fn issue_session(&self, user: &User) -> Result<AuthSession, AuthError> {
        let issued = self.tokens.issue(user.id, &user.email)?;
        self.refresh_tokens
            .create(user.id, &issued.pair.refresh_token, issued.refresh_expires_at)
            .await?;
        Ok(AuthSession {
            user: PublicUser::from(user),
            tokens: issued.pair,
        })
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
