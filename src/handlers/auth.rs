use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::auth::{AuthSession, RegisterInput};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::PublicUser;
use crate::response::ApiResponse;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct TelegramLoginRequest {
    pub init_data: String,
}

#[derive(Deserialize)]
pub struct GoogleCallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Serialize)]
pub struct GoogleUrlResponse {
    pub url: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

fn required(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterInput>,
) -> AppResult<(StatusCode, Json<ApiResponse<AuthSession>>)> {
    required("email", &payload.email)?;
    let session = state.auth.register(payload).await?;
    info!("Registered user {}", session.user.id);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(session))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    required("email", &payload.email)?;
    required("password", &payload.password)?;
    let session = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(ApiResponse::ok(session)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    required("refresh_token", &payload.refresh_token)?;
    let session = state.auth.refresh(&payload.refresh_token).await?;
    Ok(Json(ApiResponse::ok(session)))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    required("refresh_token", &payload.refresh_token)?;
    state.auth.logout(&payload.refresh_token).await?;
    Ok(Json(ApiResponse::ok(MessageResponse {
        message: "Logged out".to_string(),
    })))
}

pub async fn logout_all(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<ApiResponse<LogoutAllResponse>>> {
    let revoked = state.auth.logout_all(user.user_id).await?;
    Ok(Json(ApiResponse::ok(LogoutAllResponse { revoked })))
}

pub async fn telegram_login(
    State(state): State<AppState>,
    Json(payload): Json<TelegramLoginRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    required("init_data", &payload.init_data)?;
    let session = state.auth.telegram_login(&payload.init_data).await?;
    Ok(Json(ApiResponse::ok(session)))
}

pub async fn google_url(State(state): State<AppState>) -> AppResult<Json<ApiResponse<GoogleUrlResponse>>> {
    let url = state.auth.google_auth_url().await?;
    Ok(Json(ApiResponse::ok(GoogleUrlResponse { url })))
}

pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<GoogleCallbackQuery>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    let session = state.auth.google_callback(&query.code, &query.state).await?;
    Ok(Json(ApiResponse::ok(session)))
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let profile = state.auth.current_user(user.user_id).await?;
    Ok(Json(ApiResponse::ok(profile)))
}
