use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::StoreError;
use crate::models::{NewUser, User};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `StoreError::Conflict` when the email or an external id is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, StoreError>;

    /// Attaches a Google id; `avatar_url` only fills an empty avatar.
    /// Never replaces a different Google id already on the user (`Conflict`).
    async fn link_google(
        &self,
        user_id: Uuid,
        google_id: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError>;

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError>;

    /// Only returns records that are not revoked and not expired at `now`.
    async fn get_valid(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Atomically flips a valid token to revoked. `false` when it was already
    /// revoked, expired or unknown, so concurrent rotations have one winner.
    async fn revoke(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait OAuthStateStore: Send + Sync {
    async fn put(&self, state: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Deletes the state and reports whether it existed and was unexpired.
    async fn take(&self, state: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
