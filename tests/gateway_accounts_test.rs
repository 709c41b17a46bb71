// Public accounts API end to end: gateway router -> RPC -> portfolio service.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use fintrack_api::cache::{MemoryCache, SharedCache};
use fintrack_api::gateway::RpcPortfolioClient;
use fintrack_api::middleware::RateLimiter;
use fintrack_api::resilience::{BreakerConfig, BreakerRegistry};
use fintrack_api::rpc::RpcClient;
use fintrack_api::{build_router, AppState};

mod test_helpers;
use test_helpers::*;

struct Gateway {
    server: TestServer,
    portfolio: PortfolioFixture,
}

async fn gateway() -> Gateway {
    let portfolio = spawn_portfolio(rate_table("USD", &[("EUR", 0.9), ("GBP", 0.8)])).await;

    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    let rpc = RpcClient::new(&portfolio.url, Duration::from_secs(2)).unwrap();
    let client = Arc::new(RpcPortfolioClient::new(rpc, breakers.clone(), Duration::from_secs(2)));
    let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());

    let state = AppState {
        config: Arc::new(test_config(&[])),
        auth: Arc::new(test_auth_service(MemoryCredentialStore::new())),
        accounts: client.clone(),
        market: client.clone(),
        fx: client.clone(),
        transactions: client,
        rate_limiter: RateLimiter::new(cache, 1000, 100),
        breakers,
    };

    Gateway {
        server: TestServer::new(build_router(state)).unwrap(),
        portfolio,
    }
}

/// Registers a fresh user and returns (user id, access token).
async fn sign_up(server: &TestServer, email: &str) -> (Uuid, String) {
    let response = server
        .post("/api/v1/auth/register")
        .json(&json!({"email": email, "password": "Passw0rd!"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let id = body["data"]["user"]["id"].as_str().unwrap().parse().unwrap();
    let token = body["data"]["tokens"]["access_token"].as_str().unwrap().to_string();
    (id, token)
}

async fn create_account(server: &TestServer, token: &str, name: &str, currency: &str) -> String {
    let response = server
        .post("/api/v1/accounts")
        .authorization_bearer(token)
        .json(&json!({"name": name, "type": "bank", "currency": currency}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn add_sub_account(server: &TestServer, token: &str, account_id: &str, currency: &str, balance: f64) -> Value {
    let response = server
        .post(&format!("/api/v1/accounts/{}/sub-accounts", account_id))
        .authorization_bearer(token)
        .json(&json!({
            "name": format!("{} cash", currency),
            "asset_class": "cash",
            "currency": currency,
            "balance": balance,
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["data"].clone()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[tokio::test]
async fn test_mixed_currency_account_is_normalized() {
    let gw = gateway().await;
    let (_, token) = sign_up(&gw.server, "mixed@example.com").await;

    let account_id = create_account(&gw.server, &token, "Main", "USD").await;
    let reply = add_sub_account(&gw.server, &token, &account_id, "EUR", 100.0).await;
    assert!(close(reply["account_total_balance"].as_f64().unwrap(), 100.0 / 0.9));

    let response = gw
        .server
        .get("/api/v1/accounts")
        .add_query_param("baseCurrency", "USD")
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["success"], true);
    assert_eq!(body["meta"]["total"], 1);
    let account = &body["data"]["accounts"][0];
    assert_eq!(account["is_mixed_currency"], true);
    let converted = account["converted_total_balance"].as_f64().unwrap();
    assert!((converted - 111.11).abs() < 0.01, "converted was {}", converted);

    let sub = &account["sub_accounts"][0];
    assert_eq!(sub["currency"], "EUR");
    assert_eq!(sub["balance"], 100.0);
    assert!(close(sub["balance_in_account_currency"].as_f64().unwrap(), 100.0 / 0.9));
}

#[tokio::test]
async fn test_other_users_account_is_not_found() {
    let gw = gateway().await;
    let (_, owner) = sign_up(&gw.server, "owner@example.com").await;
    let (_, intruder) = sign_up(&gw.server, "intruder@example.com").await;
    let account_id = create_account(&gw.server, &owner, "Private", "USD").await;
    let sub = add_sub_account(&gw.server, &owner, &account_id, "USD", 10.0).await;
    let sub_id = sub["sub_account"]["id"].as_str().unwrap();

    let response = gw
        .server
        .delete(&format!("/api/v1/accounts/{}", account_id))
        .authorization_bearer(&intruder)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    gw.server
        .patch(&format!("/api/v1/sub-accounts/{}", sub_id))
        .authorization_bearer(&intruder)
        .json(&json!({"balance": 0.0}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let listed: Value = gw.server.get("/api/v1/accounts").authorization_bearer(&intruder).await.json();
    assert_eq!(listed["data"]["accounts"].as_array().unwrap().len(), 0);

    // The owner still sees everything
    let listed: Value = gw.server.get("/api/v1/accounts").authorization_bearer(&owner).await.json();
    assert!(close(listed["data"]["accounts"][0]["total_balance"].as_f64().unwrap(), 10.0));
}

#[tokio::test]
async fn test_protected_routes_require_a_bearer_token() {
    let gw = gateway().await;

    let response = gw.server.get("/api/v1/accounts").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["success"], false);

    gw.server
        .get("/api/v1/net-worth")
        .authorization_bearer("not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sub_account_update_and_delete_keep_totals() {
    let gw = gateway().await;
    let (_, token) = sign_up(&gw.server, "edits@example.com").await;
    let account_id = create_account(&gw.server, &token, "Main", "USD").await;
    add_sub_account(&gw.server, &token, &account_id, "USD", 40.0).await;
    let eur = add_sub_account(&gw.server, &token, &account_id, "EUR", 90.0).await;
    let eur_id = eur["sub_account"]["id"].as_str().unwrap();

    let response = gw
        .server
        .patch(&format!("/api/v1/sub-accounts/{}", eur_id))
        .authorization_bearer(&token)
        .json(&json!({"balance": 45.0}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(close(body["data"]["account_total_balance"].as_f64().unwrap(), 90.0));

    gw.server
        .delete(&format!("/api/v1/sub-accounts/{}", eur_id))
        .authorization_bearer(&token)
        .await
        .assert_status_ok();

    let account_uuid: Uuid = account_id.parse().unwrap();
    let stored = gw.portfolio.ledger.accounts.stored_total(account_uuid).unwrap();
    assert!(close(stored, 40.0));
}

#[tokio::test]
async fn test_net_worth_sums_in_base_currency() {
    let gw = gateway().await;
    let (_, token) = sign_up(&gw.server, "worth@example.com").await;
    let account_id = create_account(&gw.server, &token, "Main", "USD").await;
    add_sub_account(&gw.server, &token, &account_id, "USD", 50.0).await;
    add_sub_account(&gw.server, &token, &account_id, "EUR", 100.0).await;

    let response = gw
        .server
        .get("/api/v1/net-worth")
        .add_query_param("baseCurrency", "USD")
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["data"]["base_currency"], "USD");
    assert!(close(body["data"]["by_currency"]["EUR"].as_f64().unwrap(), 100.0));
    let total = body["data"]["total"].as_f64().unwrap();
    assert!((total - (50.0 + 100.0 / 0.9)).abs() < 1e-6, "total was {}", total);

    gw.server
        .get("/api/v1/net-worth")
        .add_query_param("baseCurrency", "DOLLARS")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_cash_flow_converts_and_groups_by_category() {
    let gw = gateway().await;
    let (user_id, token) = sign_up(&gw.server, "flow@example.com").await;
    let txs = &gw.portfolio.transactions;
    txs.add(transaction(user_id, "income", 1000.0, "USD", "salary", "2026-03-01"));
    txs.add(transaction(user_id, "expense", 90.0, "EUR", "groceries", "2026-03-05"));
    txs.add(transaction(user_id, "transfer", 500.0, "USD", "transfer", "2026-03-06"));
    txs.add(transaction(user_id, "expense", 20.0, "USD", "groceries", "2026-04-02"));
    txs.add(transaction(Uuid::new_v4(), "income", 9999.0, "USD", "salary", "2026-03-01"));

    let response = gw
        .server
        .get("/api/v1/transactions/cash-flow")
        .add_query_param("from", "2026-03-01")
        .add_query_param("to", "2026-03-31")
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    let data = response.json::<Value>()["data"].clone();

    assert!(close(data["income"].as_f64().unwrap(), 1000.0));
    assert!(close(data["expense"].as_f64().unwrap(), 100.0));
    assert!(close(data["net"].as_f64().unwrap(), 900.0));
    assert!(close(data["by_category"]["groceries"].as_f64().unwrap(), -100.0));
    assert_eq!(data["transaction_count"], 2);

    gw.server
        .get("/api/v1/transactions/cash-flow")
        .add_query_param("from", "2026-04-01")
        .add_query_param("to", "2026-03-01")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let gw = gateway().await;

    let response = gw.server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
    assert!(response.headers().get("x-request-id").is_some());

    let response = gw.server.get("/api/v1/nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["success"], false);
}
