use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub breakers: Vec<BreakerStatus>,
}

/// Liveness plus the state of every downstream breaker seen so far.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let breakers = state
        .breakers
        .states()
        .into_iter()
        .map(|(name, s)| BreakerStatus {
            name,
            state: s.to_string(),
        })
        .collect();
    Json(HealthResponse { status: "ok", breakers })
}
