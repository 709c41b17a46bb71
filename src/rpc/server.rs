use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

use super::client::{MESSAGE_HEADER, STATUS_HEADER, TIMEOUT_HEADER};
use super::codec;
use super::status::{Code, RpcError};

/// Decoded request message.
pub struct RpcRequest<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for RpcRequest<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = RpcError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| RpcError::invalid_argument(format!("unreadable request body: {}", e)))?;
        codec::decode(&bytes).map(RpcRequest)
    }
}

/// Successful reply message.
pub struct RpcReply<T>(pub T);

pub type RpcResult<T> = Result<RpcReply<T>, RpcError>;

impl<T: Serialize> IntoResponse for RpcReply<T> {
    fn into_response(self) -> Response {
        match codec::encode(&self.0) {
            Ok(frame) => {
                let mut response = (StatusCode::OK, frame).into_response();
                let headers = response.headers_mut();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(codec::CONTENT_TYPE));
                headers.insert(STATUS_HEADER, HeaderValue::from_static("0"));
                response
            }
            Err(err) => err.into_response(),
        }
    }
}

/// Errors travel in headers with an HTTP 200, like trailers-only responses.
impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, ()).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(codec::CONTENT_TYPE));
        if let Ok(v) = HeaderValue::from_str(&self.code.as_i32().to_string()) {
            headers.insert(STATUS_HEADER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&codec::encode_message_header(&self.message)) {
            headers.insert(MESSAGE_HEADER, v);
        }
        response
    }
}

/// Applies the caller's `rpc-timeout` (milliseconds) to the handler.
pub async fn deadline_middleware(req: Request, next: Next) -> Response {
    let timeout = req
        .headers()
        .get(TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis);

    match timeout {
        Some(limit) => {
            let path = req.uri().path().to_string();
            match tokio::time::timeout(limit, next.run(req)).await {
                Ok(response) => response,
                Err(_) => {
                    debug!("{} exceeded its {:?} deadline", path, limit);
                    RpcError::new(Code::DeadlineExceeded, "deadline exceeded").into_response()
                }
            }
        }
        None => next.run(req).await,
    }
}

/// Fallback for unknown methods.
pub async fn unimplemented(req: Request) -> RpcError {
    RpcError::new(
        Code::Unimplemented,
        format!("method {} is not implemented", req.uri().path()),
    )
}
