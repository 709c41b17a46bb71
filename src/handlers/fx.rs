use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::gateway::CallContext;
use crate::middleware::AuthUser;
use crate::models::{Conversion, RateTable, DEFAULT_CURRENCY};
use crate::response::ApiResponse;
use crate::rpc::messages::ConvertRequest;

#[derive(Deserialize)]
pub struct RatesQuery {
    #[serde(default)]
    pub base: Option<String>,
}

#[derive(Deserialize)]
pub struct ConvertQuery {
    pub amount: f64,
    pub from: String,
    pub to: String,
}

pub async fn get_rates(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: CallContext,
    Query(query): Query<RatesQuery>,
) -> AppResult<Json<ApiResponse<RateTable>>> {
    let base = query.base.unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let rates = state.fx.get_rates(&ctx, &base).await?;
    Ok(Json(ApiResponse::ok(rates)))
}

pub async fn convert(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: CallContext,
    Query(query): Query<ConvertQuery>,
) -> AppResult<Json<ApiResponse<Conversion>>> {
    if !query.amount.is_finite() {
        return Err(AppError::validation("amount must be a finite number"));
    }
    let req = ConvertRequest {
        amount: query.amount,
        from: query.from,
        to: query.to,
    };
    let conversion = state.fx.convert(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(conversion)))
}
