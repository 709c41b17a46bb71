use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{OAuthStateStore, RefreshTokenRecord, RefreshTokenStore, UserStore};
use crate::database::{DatabasePool, StoreError};
use crate::models::{NewUser, User};

const USER_COLUMNS: &str = "id, email, password_hash, google_id, telegram_id, first_name, last_name, \
     avatar_url, base_currency, is_active, last_login_at, created_at, updated_at";

/// Users, refresh tokens and OAuth states in Postgres.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: DatabasePool,
    email_case_insensitive: bool,
}

impl PgCredentialStore {
    pub fn new(pool: DatabasePool, email_case_insensitive: bool) -> Self {
        Self {
            pool,
            email_case_insensitive,
        }
    }

    fn email_predicate(&self) -> &'static str {
        if self.email_case_insensitive {
            "LOWER(email) = LOWER($1)"
        } else {
            "email = $1"
        }
    }
}

#[async_trait]
impl UserStore for PgCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        // The unique index is case-sensitive, so the relaxed mode checks first.
        if self.email_case_insensitive && self.find_by_email(&user.email).await?.is_some() {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO users (id, email, password_hash, google_id, telegram_id, first_name, last_name, \
             avatar_url, base_currency, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, $10, $10) RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.google_id)
            .bind(user.telegram_id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.avatar_url)
            .bind(&user.base_currency)
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(StoreError::from_write)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users WHERE {} LIMIT 1",
            USER_COLUMNS,
            self.email_predicate()
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&*self.pool)
            .await?)
    }

    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE google_id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(google_id)
            .fetch_optional(&*self.pool)
            .await?)
    }

    async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE telegram_id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(telegram_id)
            .fetch_optional(&*self.pool)
            .await?)
    }

    async fn link_google(
        &self,
        user_id: Uuid,
        google_id: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET google_id = $2, \
             avatar_url = COALESCE(NULLIF(avatar_url, ''), $3), updated_at = NOW() \
             WHERE id = $1 AND (google_id IS NULL OR google_id = $2) RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(google_id)
            .bind(avatar_url)
            .fetch_optional(&*self.pool)
            .await
            .map_err(StoreError::from_write)?
            .ok_or_else(|| StoreError::Conflict("users_google_id_key".to_string()))
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for PgCredentialStore {
    async fn create(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        sqlx::query_as::<_, RefreshTokenRecord>(
            "INSERT INTO refresh_tokens (id, user_id, token, expires_at, revoked, created_at) \
             VALUES ($1, $2, $3, $4, FALSE, NOW()) \
             RETURNING id, user_id, token, expires_at, revoked, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(StoreError::from_write)
    }

    async fn get_valid(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT id, user_id, token, expires_at, revoked, created_at FROM refresh_tokens \
             WHERE token = $1 AND revoked = FALSE AND expires_at > $2",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?)
    }

    async fn revoke(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE token = $1 AND revoked = FALSE AND expires_at > $2",
        )
        .bind(token)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OAuthStateStore for PgCredentialStore {
    async fn put(&self, state: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO oauth_states (state, expires_at, created_at) VALUES ($1, $2, NOW())")
            .bind(state)
            .bind(expires_at)
            .execute(&*self.pool)
            .await
            .map_err(StoreError::from_write)?;
        Ok(())
    }

    async fn take(&self, state: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let expires_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("DELETE FROM oauth_states WHERE state = $1 RETURNING expires_at")
                .bind(state)
                .fetch_optional(&*self.pool)
                .await?;
        Ok(matches!(expires_at, Some(exp) if exp > now))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
