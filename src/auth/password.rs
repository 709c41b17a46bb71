use tracing::error;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_BCRYPT_COST: u32 = 12;

/// Verified against when the user does not exist, so a miss costs the same
/// as a wrong password.
const DUMMY_HASH: &str = "$2b$12$MzvHQ6CeZgenzzwkEV2WeeDQscVKQed1kTh8NxB7w2bXCXe2qFjxK";

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    TooShort,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// bcrypt on the blocking pool.
#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Costs below 12 are raised to 12.
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.max(MIN_BCRYPT_COST),
        }
    }

    /// Unclamped; only meant for fast test fixtures.
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn validate_policy(password: &str) -> Result<(), PasswordError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PasswordError::TooShort);
        }
        Ok(())
    }

    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| PasswordError::Hash(e.to_string()))?
            .map_err(|e| PasswordError::Hash(e.to_string()))
    }

    /// `false` for a mismatch, a missing hash, or a corrupt hash. A missing
    /// hash still pays for one bcrypt verification.
    pub async fn verify(&self, password: &str, hash: Option<&str>) -> bool {
        let known = hash.is_some();
        let password = password.to_string();
        let hash = hash.unwrap_or(DUMMY_HASH).to_string();

        let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await;
        match outcome {
            Ok(Ok(matched)) => known && matched,
            Ok(Err(e)) => {
                error!("Stored password hash could not be verified: {}", e);
                false
            }
            Err(e) => {
                error!("Password verification task failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_clamped() {
        assert_eq!(PasswordHasher::new(4).cost(), 12);
        assert_eq!(PasswordHasher::new(13).cost(), 13);
    }

    #[test]
    fn policy_requires_eight_characters() {
        assert!(PasswordHasher::validate_policy("short").is_err());
        assert!(PasswordHasher::validate_policy("Passw0rd!").is_ok());
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = PasswordHasher::with_cost(4);
        let hash = hasher.hash("Passw0rd!").await.unwrap();
        assert!(hasher.verify("Passw0rd!", Some(&hash)).await);
        assert!(!hasher.verify("wrong-password", Some(&hash)).await);
    }

    #[tokio::test]
    async fn missing_hash_never_matches() {
        let hasher = PasswordHasher::with_cost(4);
        assert!(!hasher.verify("anything", None).await);
    }
}
