use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tracing::debug;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::AppError;

/// Authenticated caller. Every downstream call takes its `user_id` from here,
/// never from the request body.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

fn auth_declined() -> Response {
    AppError::Unauthorized("Invalid or expired token".to_string()).into_response()
}

/// Verifies the bearer access token and attaches [`AuthUser`] to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return auth_declined();
    };

    let claims = match state.auth.verify_access(bearer.token()) {
        Ok(claims) => claims,
        Err(e) => {
            debug!("Rejected access token on {}: {}", req.uri().path(), e);
            return auth_declined();
        }
    };

    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        email: claims.email,
    });
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}
