use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Refresh,
}

/// Shared envelope of both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub purpose: TokenPurpose,
    pub iat: i64,
    pub exp: i64,
    /// Random id so two tokens minted in the same second differ.
    pub jti: String,
}

/// Result of verifying a token of unknown kind.
#[derive(Debug, Clone)]
pub enum VerifiedToken {
    Access(Claims),
    Refresh(Claims),
}

impl VerifiedToken {
    pub fn claims(&self) -> &Claims {
        match self {
            VerifiedToken::Access(c) | VerifiedToken::Refresh(c) => c,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("expected a {expected:?} token, got {actual:?}")]
    WrongPurpose {
        expected: TokenPurpose,
        actual: TokenPurpose,
    },
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub pair: TokenPair,
    pub refresh_expires_at: DateTime<Utc>,
}

/// HS256 token minting and verification.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenManager {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_access_duration,
            config.jwt_refresh_duration,
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue(&self, subject: Uuid, email: &str) -> Result<IssuedTokens, TokenError> {
        let now = Utc::now().timestamp();
        let access = self.sign(subject, email, TokenPurpose::Access, now, self.access_ttl)?;
        let (refresh, refresh_exp) =
            self.sign_with_exp(subject, email, TokenPurpose::Refresh, now, self.refresh_ttl)?;

        let refresh_expires_at = Utc
            .timestamp_opt(refresh_exp, 0)
            .single()
            .ok_or_else(|| TokenError::Signing("refresh expiry out of range".to_string()))?;

        Ok(IssuedTokens {
            pair: TokenPair {
                access_token: access,
                refresh_token: refresh,
                token_type: "Bearer".to_string(),
                expires_in: self.access_ttl.as_secs() as i64,
            },
            refresh_expires_at,
        })
    }

    /// Verifies signature and expiry, then tags the claims by purpose.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed(e.to_string()),
        })?;
        let claims = data.claims;

        // jsonwebtoken accepts exp == now; we do not.
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(match claims.purpose {
            TokenPurpose::Access => VerifiedToken::Access(claims),
            TokenPurpose::Refresh => VerifiedToken::Refresh(claims),
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        match self.verify(token)? {
            VerifiedToken::Access(c) => Ok(c),
            VerifiedToken::Refresh(_) => Err(TokenError::WrongPurpose {
                expected: TokenPurpose::Access,
                actual: TokenPurpose::Refresh,
            }),
        }
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        match self.verify(token)? {
            VerifiedToken::Refresh(c) => Ok(c),
            VerifiedToken::Access(_) => Err(TokenError::WrongPurpose {
                expected: TokenPurpose::Refresh,
                actual: TokenPurpose::Access,
            }),
        }
    }

    fn sign(
        &self,
        subject: Uuid,
        email: &str,
        purpose: TokenPurpose,
        now: i64,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.sign_with_exp(subject, email, purpose, now, ttl).map(|(t, _)| t)
    }

    fn sign_with_exp(
        &self,
        subject: Uuid,
        email: &str,
        purpose: TokenPurpose,
        now: i64,
        ttl: Duration,
    ) -> Result<(String, i64), TokenError> {
        let exp = now + ttl.as_secs() as i64;
        let claims = Claims {
            sub: subject,
            email: email.to_string(),
            purpose,
            iat: now,
            exp,
            jti: random_jti(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, exp))
    }
}

fn random_jti() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new("test-secret", Duration::from_secs(900), Duration::from_secs(3600))
    }

    #[test]
    fn issued_tokens_verify_with_their_purpose() {
        let m = manager();
        let user = Uuid::new_v4();
        let issued = m.issue(user, "a@b.c").unwrap();

        let access = m.verify_access(&issued.pair.access_token).unwrap();
        assert_eq!(access.sub, user);
        assert_eq!(access.email, "a@b.c");
        assert_eq!(access.exp - access.iat, 900);
        assert_eq!(issued.pair.expires_in, 900);

        let refresh = m.verify_refresh(&issued.pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, user);
    }

    #[test]
    fn wrong_purpose_is_rejected() {
        let m = manager();
        let issued = m.issue(Uuid::new_v4(), "a@b.c").unwrap();
        assert!(matches!(
            m.verify_access(&issued.pair.refresh_token),
            Err(TokenError::WrongPurpose { .. })
        ));
        assert!(matches!(
            m.verify_refresh(&issued.pair.access_token),
            Err(TokenError::WrongPurpose { .. })
        ));
    }

    #[test]
    fn zero_lifetime_token_is_already_expired() {
        let m = TokenManager::new("test-secret", Duration::ZERO, Duration::ZERO);
        let issued = m.issue(Uuid::new_v4(), "a@b.c").unwrap();
        assert!(matches!(
            m.verify_access(&issued.pair.access_token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn foreign_secret_fails_signature() {
        let issued = manager().issue(Uuid::new_v4(), "a@b.c").unwrap();
        let other = TokenManager::new("other", Duration::from_secs(900), Duration::from_secs(900));
        assert!(matches!(
            other.verify_access(&issued.pair.access_token),
            Err(TokenError::BadSignature)
        ));
        assert!(matches!(other.verify("not-a-jwt"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn refresh_tokens_are_unique_within_a_second() {
        let m = manager();
        let user = Uuid::new_v4();
        let a = m.issue(user, "a@b.c").unwrap();
        let b = m.issue(user, "a@b.c").unwrap();
        assert_ne!(a.pair.refresh_token, b.pair.refresh_token);
    }
}
