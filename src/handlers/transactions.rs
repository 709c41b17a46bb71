use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::gateway::{fanout, CallContext, CashFlowView};
use crate::handlers::accounts::BaseCurrencyQuery;
use crate::middleware::AuthUser;
use crate::response::ApiResponse;

#[derive(Deserialize)]
pub struct CashFlowQuery {
    #[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]
    pub from: Option<NaiveDate>,
    #[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]
    pub to: Option<NaiveDate>,
    #[serde(default, alias = "baseCurrency")]
    pub base_currency: Option<String>,
}

pub async fn cash_flow(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Query(query): Query<CashFlowQuery>,
) -> AppResult<Json<ApiResponse<CashFlowView>>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::validation("from must not be after to"));
        }
    }
    let base = BaseCurrencyQuery {
        base_currency: query.base_currency,
    }
    .resolve()?;

    let mut view = fanout::cash_flow(
        state.transactions.as_ref(),
        state.fx.as_ref(),
        &ctx,
        user.user_id,
        &base,
        query.from,
        query.to,
        state.downstream_timeout(),
    )
    .await?;
    let warnings = std::mem::take(&mut view.warnings);
    Ok(Json(ApiResponse::ok(view).with_warnings(warnings)))
}
