use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::app::AppState;
use crate::cache::SharedCache;
use crate::error::AppError;

const WINDOW: Duration = Duration::from_secs(60);

/// Fixed one-minute windows counted in the shared cache, so limits hold
/// across gateway replicas.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn SharedCache>,
    per_minute: u32,
    auth_per_minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the window resets.
    pub reset: i64,
}

impl RateDecision {
    fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.to_string()),
        ] {
            if let Ok(v) = HeaderValue::from_str(&value) {
                headers.insert(name, v);
            }
        }
    }
}

impl RateLimiter {
    /// A limit of 0 disables that scope.
    pub fn new(cache: Arc<dyn SharedCache>, per_minute: u32, auth_per_minute: u32) -> Self {
        Self {
            cache,
            per_minute,
            auth_per_minute,
        }
    }

    fn limit_for(&self, scope: &str) -> u32 {
        if scope == "auth" {
            self.auth_per_minute
        } else {
            self.per_minute
        }
    }

    /// `None` when the scope is disabled or the counter store is unreachable.
    pub async fn check(&self, scope: &str, principal: &str, now: i64) -> Option<RateDecision> {
        let limit = self.limit_for(scope);
        if limit == 0 {
            return None;
        }
        let window = now.div_euclid(WINDOW.as_secs() as i64);
        let key = format!("ratelimit:{}:{}:{}", scope, principal, window);

        let count = match self.cache.incr_window(&key, WINDOW).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Rate limit store unavailable, allowing request: {}", e);
                return None;
            }
        };

        Some(RateDecision {
            allowed: count <= limit as u64,
            limit,
            remaining: (limit as u64).saturating_sub(count) as u32,
            reset: (window + 1) * WINDOW.as_secs() as i64,
        })
    }
}

// First hop of X-Forwarded-For, then X-Real-IP.
fn extract_ip(headers: &HeaderMap) -> String {
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return ip.trim().to_string();
    }
    if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return ip.trim().to_string();
    }
    "unknown".to_string()
}

/// Authenticated callers are counted per user, everyone else per IP. Auth
/// endpoints get their own stricter scope.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/health" {
        return next.run(req).await;
    }

    let scope = if path.starts_with("/api/v1/auth/") { "auth" } else { "api" };
    let principal = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| state.auth.verify_access(token).ok())
        .map(|claims| format!("user:{}", claims.sub))
        .unwrap_or_else(|| format!("ip:{}", extract_ip(req.headers())));

    let Some(decision) = state.rate_limiter.check(scope, &principal, Utc::now().timestamp()).await else {
        return next.run(req).await;
    };

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        AppError::TooManyRequests.into_response()
    };
    decision.apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn counts_within_the_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), 2, 1);
        let now = 1_700_000_000;
        let first = limiter.check("api", "ip:1.2.3.4", now).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter.check("api", "ip:1.2.3.4", now).await.unwrap().allowed);
        let third = limiter.check("api", "ip:1.2.3.4", now).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.reset % 60, 0);

        // next minute starts a fresh counter
        assert!(limiter.check("api", "ip:1.2.3.4", now + 60).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn zero_disables_a_scope() {
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), 0, 5);
        assert!(limiter.check("api", "ip:x", 0).await.is_none());
        assert!(limiter.check("auth", "ip:x", 0).await.is_some());
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        assert_eq!(extract_ip(&headers), "10.0.0.1");
        assert_eq!(extract_ip(&HeaderMap::new()), "unknown");
    }
}
