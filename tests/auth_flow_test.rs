// Registration, login and refresh-token rotation against in-memory stores.

use fintrack_api::auth::{AuthError, RegisterInput};
use fintrack_api::background::run_janitor;

mod test_helpers;
use test_helpers::*;

fn register_input(email: &str, password: &str) -> RegisterInput {
    RegisterInput {
        email: email.to_string(),
        password: password.to_string(),
        first_name: Some("Ada".to_string()),
        last_name: None,
        base_currency: None,
    }
}

#[tokio::test]
async fn test_register_issues_verifiable_tokens() {
    let store = MemoryCredentialStore::new();
    let auth = test_auth_service(store.clone());

    let session = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    let claims = auth.verify_access(&session.tokens.access_token).unwrap();
    assert_eq!(claims.sub, session.user.id);
    assert_eq!(session.user.email, "a@b.c");
    assert_eq!(session.user.base_currency, "USD");
    assert!(session.user.has_password);

    let record = store
        .token_record(&session.tokens.refresh_token)
        .expect("refresh token should be stored");
    assert_eq!(record.user_id, session.user.id);
    assert!(!record.revoked);
}

#[tokio::test]
async fn test_register_same_email_conflicts() {
    let auth = test_auth_service(MemoryCredentialStore::new());
    auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    let err = auth.register(register_input("a@b.c", "Another1!")).await.unwrap_err();
    assert!(matches!(err, AuthError::Conflict), "got {:?}", err);
}

#[tokio::test]
async fn test_register_rejects_short_password_and_bad_email() {
    let auth = test_auth_service(MemoryCredentialStore::new());

    let err = auth.register(register_input("a@b.c", "short")).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    let err = auth.register(register_input("not-an-email", "Passw0rd!")).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn test_login_updates_last_login() {
    let store = MemoryCredentialStore::new();
    let auth = test_auth_service(store.clone());
    auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();
    assert!(store.user_by_email("a@b.c").unwrap().last_login_at.is_none());

    let session = auth.login("a@b.c", "Passw0rd!").await.unwrap();

    assert!(auth.verify_access(&session.tokens.access_token).is_ok());
    assert!(store.user_by_email("a@b.c").unwrap().last_login_at.is_some());
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_fail_identically() {
    let auth = test_auth_service(MemoryCredentialStore::new());
    auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    let wrong = auth.login("a@b.c", "WrongPass1").await.unwrap_err();
    let unknown = auth.login("nobody@b.c", "Passw0rd!").await.unwrap_err();

    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert_eq!(wrong.to_string(), unknown.to_string());
}

#[tokio::test]
async fn test_inactive_user_cannot_login() {
    let store = MemoryCredentialStore::new();
    let auth = test_auth_service(store.clone());
    let session = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();
    store.deactivate(session.user.id);

    let err = auth.login("a@b.c", "Passw0rd!").await.unwrap_err();
    assert!(matches!(err, AuthError::Inactive));
}

#[tokio::test]
async fn test_refresh_rotates_and_old_token_is_spent() {
    let store = MemoryCredentialStore::new();
    let auth = test_auth_service(store.clone());
    let first = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    let second = auth.refresh(&first.tokens.refresh_token).await.unwrap();
    assert_ne!(second.tokens.refresh_token, first.tokens.refresh_token);
    assert!(store.token_record(&first.tokens.refresh_token).unwrap().revoked);

    let err = auth.refresh(&first.tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken { .. }), "got {:?}", err);

    // The rotated token still works exactly once
    auth.refresh(&second.tokens.refresh_token).await.unwrap();
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let auth = test_auth_service(MemoryCredentialStore::new());
    let session = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    let err = auth.refresh(&session.tokens.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken { .. }));
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let store = MemoryCredentialStore::new();
    let auth = test_auth_service(store.clone());
    let session = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    auth.logout(&session.tokens.refresh_token).await.unwrap();
    auth.logout(&session.tokens.refresh_token).await.unwrap();
    auth.logout("never-issued").await.unwrap();

    assert!(auth.refresh(&session.tokens.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_logout_all_revokes_every_session() {
    let auth = test_auth_service(MemoryCredentialStore::new());
    let first = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();
    let second = auth.login("a@b.c", "Passw0rd!").await.unwrap();

    let revoked = auth.logout_all(first.user.id).await.unwrap();
    assert_eq!(revoked, 2);

    assert!(auth.refresh(&first.tokens.refresh_token).await.is_err());
    assert!(auth.refresh(&second.tokens.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_janitor_purges_expired_tokens() {
    let store = MemoryCredentialStore::new();
    let auth = test_auth_service(store.clone());
    let session = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();
    store.insert_expired_token(session.user.id, "stale-token");

    run_janitor(&auth).await;

    assert!(store.token_record("stale-token").is_none());
    assert!(store.token_record(&session.tokens.refresh_token).is_some());
}

#[tokio::test]
async fn test_current_user_hides_credentials() {
    let auth = test_auth_service(MemoryCredentialStore::new());
    let session = auth.register(register_input("a@b.c", "Passw0rd!")).await.unwrap();

    let me = auth.current_user(session.user.id).await.unwrap();
    let json = serde_json::to_value(&me).unwrap();
    assert!(json.get("password_hash").is_none());
    assert_eq!(json["email"], "a@b.c");
}
