//! Credentials, tokens and sign-in flows owned by the gateway.

pub mod google;
pub mod password;
pub mod postgres;
pub mod service;
pub mod store;
pub mod telegram;
pub mod tokens;

pub use google::{GoogleIdentity, GoogleOAuthClient, GoogleUserInfo, IdentityError};
pub use password::{PasswordError, PasswordHasher};
pub use postgres::PgCredentialStore;
pub use service::{AuthError, AuthService, AuthSession, RegisterInput};
pub use store::{OAuthStateStore, RefreshTokenRecord, RefreshTokenStore, UserStore};
pub use telegram::{sign_init_data, validate_init_data, TelegramError, TelegramUser};
pub use tokens::{Claims, TokenError, TokenManager, TokenPair, TokenPurpose, VerifiedToken};
