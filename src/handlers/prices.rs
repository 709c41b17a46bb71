use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::gateway::CallContext;
use crate::middleware::AuthUser;
use crate::models::{BatchPrices, PriceData, RefreshOutcome};
use crate::response::ApiResponse;
use crate::rpc::messages::{
    GetHistoryRequest, GetPriceRequest, GetPricesRequest, HistoryReply, RefreshUserRequest, SearchReply, SearchRequest,
};

const DEFAULT_HISTORY_DAYS: i64 = 30;
const MAX_BATCH_SYMBOLS: usize = 100;

#[derive(Deserialize)]
pub struct PriceQuery {
    #[serde(default)]
    pub asset_class: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub asset_class: Option<String>,
    #[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]
    pub from: Option<NaiveDate>,
    #[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]
    pub to: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct BatchBody {
    /// symbol → asset class
    pub symbols: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
pub struct RefreshBody {
    #[serde(default)]
    pub asset_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub asset_class: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

fn class_or_default(asset_class: Option<String>) -> String {
    asset_class
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "stocks".to_string())
}

pub async fn get_price(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: CallContext,
    Path(symbol): Path<String>,
    Query(query): Query<PriceQuery>,
) -> AppResult<Json<ApiResponse<PriceData>>> {
    let req = GetPriceRequest {
        symbol,
        asset_class: class_or_default(query.asset_class),
    };
    let price = state.market.get_price(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(price)))
}

pub async fn get_history(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: CallContext,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ApiResponse<HistoryReply>>> {
    let to = query.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = query.from.unwrap_or(to - ChronoDuration::days(DEFAULT_HISTORY_DAYS));
    if from > to {
        return Err(AppError::validation("from must not be after to"));
    }
    let req = GetHistoryRequest {
        symbol,
        asset_class: class_or_default(query.asset_class),
        from,
        to,
    };
    let history = state.market.get_history(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(history)))
}

/// Partial results are a success; the misses are listed in `failed_symbols`.
pub async fn batch_prices(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: CallContext,
    Json(body): Json<BatchBody>,
) -> AppResult<Json<ApiResponse<BatchPrices>>> {
    if body.symbols.is_empty() {
        return Err(AppError::validation("at least one symbol is required"));
    }
    if body.symbols.len() > MAX_BATCH_SYMBOLS {
        return Err(AppError::validation(format!("at most {} symbols per request", MAX_BATCH_SYMBOLS)));
    }
    let prices = state
        .market
        .get_prices(&ctx, GetPricesRequest { symbols: body.symbols })
        .await?;
    Ok(Json(ApiResponse::ok(prices)))
}

pub async fn refresh_prices(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    body: Option<Json<RefreshBody>>,
) -> AppResult<Json<ApiResponse<RefreshOutcome>>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let req = RefreshUserRequest {
        user_id: user.user_id,
        asset_ids: body.asset_ids,
    };
    let outcome = state.market.refresh_user(&ctx, req).await?;
    let warnings = outcome
        .failed_symbols
        .iter()
        .map(|s| format!("Price refresh failed for {}", s))
        .collect();
    Ok(Json(ApiResponse::ok(outcome).with_warnings(warnings)))
}

pub async fn search_assets(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: CallContext,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<ApiResponse<SearchReply>>> {
    if query.q.trim().is_empty() {
        return Err(AppError::validation("q is required"));
    }
    let req = SearchRequest {
        query: query.q,
        asset_class: query.asset_class,
        limit: query.limit,
    };
    let results = state.market.search(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(results)))
}
