use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::codec::{self, CONTENT_TYPE as RPC_CONTENT_TYPE};
use super::status::{Code, RpcError};
use crate::resilience::RetryPolicy;

pub const STATUS_HEADER: &str = "rpc-status";
pub const MESSAGE_HEADER: &str = "rpc-message";
pub const TIMEOUT_HEADER: &str = "rpc-timeout";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Unary client over cleartext HTTP/2 with keepalive pings.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .http2_prior_knowledge()
            .http2_keep_alive_interval(Duration::from_secs(10))
            .http2_keep_alive_timeout(Duration::from_secs(3))
            .http2_keep_alive_while_idle(true)
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::internal(format!("failed to build rpc client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
            timeout,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One request, one response. Retries `Unavailable`, `DeadlineExceeded`
    /// and `ResourceExhausted` per the retry policy.
    pub async fn unary<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        request_id: Option<&str>,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = codec::encode(request)?;
        let mut backoff = self.retry.backoff();

        loop {
            match self.send_once(path, body.clone(), request_id).await {
                Ok(frame) => return codec::decode(&frame),
                Err(err) if err.code.is_retryable() => match backoff.on_failure() {
                    Some(delay) => {
                        debug!(
                            "Retrying {} after {:?} (attempt {}): {}",
                            path,
                            delay,
                            backoff.attempt(),
                            err
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!("{} failed after {} attempts: {}", path, backoff.attempt(), err);
                        return Err(err);
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        path: &str,
        body: Vec<u8>,
        request_id: Option<&str>,
    ) -> Result<Vec<u8>, RpcError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(RPC_CONTENT_TYPE));
        if let Ok(v) = HeaderValue::from_str(&self.timeout.as_millis().to_string()) {
            headers.insert(TIMEOUT_HEADER, v);
        }
        if let Some(id) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            headers.insert(REQUEST_ID_HEADER, id);
        }

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| RpcError::from_transport(&e))?;

        if let Some(err) = status_from_headers(response.headers()) {
            return Err(err);
        }

        let status = response.status();
        if !status.is_success() {
            let code = match status.as_u16() {
                429 => Code::ResourceExhausted,
                502..=504 => Code::Unavailable,
                404 => Code::Unimplemented,
                _ => Code::Internal,
            };
            return Err(RpcError::new(code, format!("http status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RpcError::from_transport(&e))?;
        Ok(bytes.to_vec())
    }
}

fn status_from_headers(headers: &HeaderMap) -> Option<RpcError> {
    let raw = headers.get(STATUS_HEADER)?.to_str().ok()?;
    let code = Code::from_i32(raw.trim().parse().unwrap_or(2));
    if code == Code::Ok {
        return None;
    }
    let message = headers
        .get(MESSAGE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(codec::decode_message_header)
        .unwrap_or_default();
    Some(RpcError::new(code, message))
}
