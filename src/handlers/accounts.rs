use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::gateway::{fanout, AccountsView, CallContext, NetWorthView};
use crate::middleware::AuthUser;
use crate::models::{Account, Currency, DEFAULT_CURRENCY};
use crate::response::{ApiResponse, Meta};
use crate::rpc::messages::{
    CreateAccountRequest, CreateSubAccountRequest, DeleteAccountRequest, DeleteSubAccountRequest, SubAccountReply,
    UpdateSubAccountRequest,
};

#[derive(Debug, Default, Deserialize)]
pub struct BaseCurrencyQuery {
    #[serde(default, alias = "baseCurrency")]
    pub base_currency: Option<String>,
}

impl BaseCurrencyQuery {
    pub fn resolve(&self) -> AppResult<String> {
        match self.base_currency.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Currency::from_str(code)
                .map(Currency::into_string)
                .ok_or_else(|| AppError::validation(format!("invalid currency code: {}", code))),
            None => Ok(DEFAULT_CURRENCY.to_string()),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateAccountBody {
    pub name: String,
    #[serde(alias = "type")]
    pub account_type: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateSubAccountBody {
    pub name: String,
    pub asset_class: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateSubAccountBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub id: Uuid,
    pub deleted: bool,
}

pub async fn list_accounts(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Query(query): Query<BaseCurrencyQuery>,
) -> AppResult<Json<ApiResponse<AccountsView>>> {
    let base = query.resolve()?;
    let mut view = fanout::normalized_accounts(
        state.accounts.as_ref(),
        state.fx.as_ref(),
        &ctx,
        user.user_id,
        &base,
        state.downstream_timeout(),
    )
    .await?;
    let warnings = std::mem::take(&mut view.warnings);
    let meta = Meta {
        total: Some(view.total),
        ..Meta::default()
    };
    Ok(Json(ApiResponse::ok(view).with_meta(meta).with_warnings(warnings)))
}

pub async fn create_account(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Json(body): Json<CreateAccountBody>,
) -> AppResult<(StatusCode, Json<ApiResponse<Account>>)> {
    let req = CreateAccountRequest {
        user_id: user.user_id,
        name: body.name,
        account_type: body.account_type,
        currency: body.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    };
    let reply = state.accounts.create_account(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(reply.account))))
}

pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<DeletedResponse>>> {
    let req = DeleteAccountRequest {
        user_id: user.user_id,
        account_id,
    };
    state.accounts.delete_account(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(DeletedResponse {
        id: account_id,
        deleted: true,
    })))
}

pub async fn create_sub_account(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Path(account_id): Path<Uuid>,
    Json(body): Json<CreateSubAccountBody>,
) -> AppResult<(StatusCode, Json<ApiResponse<SubAccountReply>>)> {
    let req = CreateSubAccountRequest {
        user_id: user.user_id,
        account_id,
        name: body.name,
        asset_class: body.asset_class,
        currency: body.currency,
        balance: body.balance,
        symbol: body.symbol,
        quantity: body.quantity,
    };
    let reply = state.accounts.create_sub_account(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(reply))))
}

pub async fn update_sub_account(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Path(sub_account_id): Path<Uuid>,
    Json(body): Json<UpdateSubAccountBody>,
) -> AppResult<Json<ApiResponse<SubAccountReply>>> {
    let req = UpdateSubAccountRequest {
        user_id: user.user_id,
        sub_account_id,
        name: body.name,
        balance: body.balance,
        quantity: body.quantity,
        symbol: body.symbol,
    };
    let reply = state.accounts.update_sub_account(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(reply)))
}

pub async fn delete_sub_account(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Path(sub_account_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<DeletedResponse>>> {
    let req = DeleteSubAccountRequest {
        user_id: user.user_id,
        sub_account_id,
    };
    state.accounts.delete_sub_account(&ctx, req).await?;
    Ok(Json(ApiResponse::ok(DeletedResponse {
        id: sub_account_id,
        deleted: true,
    })))
}

pub async fn net_worth(
    State(state): State<AppState>,
    user: AuthUser,
    ctx: CallContext,
    Query(query): Query<BaseCurrencyQuery>,
) -> AppResult<Json<ApiResponse<NetWorthView>>> {
    let base = query.resolve()?;
    let mut view = fanout::net_worth(
        state.accounts.as_ref(),
        state.fx.as_ref(),
        &ctx,
        user.user_id,
        &base,
        state.downstream_timeout(),
    )
    .await?;
    let warnings = std::mem::take(&mut view.warnings);
    Ok(Json(ApiResponse::ok(view).with_warnings(warnings)))
}
