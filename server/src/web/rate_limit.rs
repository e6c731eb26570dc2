use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Token-bucket limiter keyed by client IP.
pub struct IpRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl IpRateLimiter {
    /// - `max_tokens`: burst capacity
    /// - `per_seconds`: refill one token every N seconds
    pub fn new(max_tokens: u32, per_seconds: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens,
            refill_rate: 1.0 / per_seconds,
        }
    }

    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.max_tokens as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Remove entries idle longer than the given duration.
    pub fn cleanup(&self, older_than: Duration) {
        let cutoff = Instant::now() - older_than;
        self.buckets
            .lock()
            .unwrap()
            .retain(|_, b| b.last_refill > cutoff);
    }
}

/// Per-IP rate limiters for the endpoint tiers.
pub struct ApiRateLimiters {
    /// Onboarding: session creation is the abuse surface, keep it tight.
    /// Burst of 10, refill 1 per 6 seconds (~10/minute).
    pub onboarding: IpRateLimiter,
    /// General API endpoints: moderate limit.
    /// Burst of 60, refill 1 per second (~60/minute sustained).
    pub api: IpRateLimiter,
    /// WebSocket connections: prevent connection storms.
    /// Burst of 5, refill 1 per 12 seconds (~5/minute).
    pub ws: IpRateLimiter,
}

impl Default for ApiRateLimiters {
    fn default() -> Self {
        Self {
            onboarding: IpRateLimiter::new(10, 6.0),
            api: IpRateLimiter::new(60, 1.0),
            ws: IpRateLimiter::new(5, 12.0),
        }
    }
}

/// Extract the client IP, only trusting proxy headers when the direct peer
/// is loopback (a local reverse proxy). Anything else uses the peer address,
/// so spoofed headers cannot bypass the limits.
fn client_ip(req: &Request<Body>) -> String {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip());
    let from_loopback = peer_ip.is_some_and(|ip| ip.is_loopback());

    if from_loopback {
        if let Some(forwarded) = req.headers().get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = req.headers().get("x-real-ip")
            && let Ok(val) = real_ip.to_str()
        {
            return val.trim().to_string();
        }
    }

    peer_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        "Rate limit exceeded. Please try again later.",
    )
        .into_response()
}

/// Middleware for onboarding rate limiting.
pub async fn onboarding_rate_limit(req: Request<Body>, next: Next) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if !limiters.onboarding.check(&ip) {
            return too_many_requests();
        }
    }
    next.run(req).await
}

/// Middleware for general API rate limiting.
pub async fn api_rate_limit(req: Request<Body>, next: Next) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if !limiters.api.check(&ip) {
            return too_many_requests();
        }
    }
    next.run(req).await
}

/// Middleware for WebSocket connection rate limiting.
pub async fn ws_rate_limit(req: Request<Body>, next: Next) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if !limiters.ws.check(&ip) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections. Please try again later.",
            )
                .into_response();
        }
    }
    next.run(req).await
}
