//! Per-client token-bucket rate limiting.
//!
//! Each client address gets a bucket holding up to `burst` tokens, refilled at
//! `rate` tokens per second. A request spends one token. Buckets idle for longer
//! than `expiry` are dropped by a background sweeper.
//!
//! Client addresses come from the first `X-Forwarded-For` hop when present, which
//! assumes a trusted reverse proxy sits in front of the server.

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, warn};

use crate::api::AppState;

const UNKNOWN_CLIENT: &str = "unknown";
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    expiry: Duration,
    clients: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate: f64, burst: u32, expiry: Duration) -> Self {
        Self {
            rate: rate.max(0.0),
            burst: f64::from(burst),
            expiry,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Spend one token for `key` as of `now`.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock();
        let bucket = clients.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_refill: now,
            last_seen: now,
        });
        bucket.last_seen = now;

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drop buckets idle for longer than `expiry`; returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= self.expiry);
        before - clients.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every `expiry` until the limiter is dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let period = self.expiry.max(MIN_SWEEP_PERIOD);
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            debug!("Starting rate limiter sweeper");
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Rate limiter dropped, stopping sweeper");
                    break;
                };
                let removed = limiter.sweep();
                debug!(removed, clients = limiter.len(), "Swept rate limiter");
            }
        })
    }
}

/// Identify the client for rate limiting.
///
/// Uses the first `X-Forwarded-For` hop when the header is present, otherwise the
/// transport peer. A present header that is blank, not UTF-8 or not an IP address
/// yields `"unknown"`; it never falls through to the peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let candidate = match headers.get("x-forwarded-for") {
        Some(value) => match value.to_str() {
            Ok(value) => value.split(',').next().unwrap_or_default().trim().to_string(),
            Err(_) => {
                warn!("x-forwarded-for is not valid UTF-8");
                return UNKNOWN_CLIENT.to_string();
            }
        },
        None => match peer {
            Some(addr) => return addr.ip().to_canonical().to_string(),
            None => String::new(),
        },
    };

    match candidate.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => {
            warn!(ip = %candidate, "failed to parse client IP address");
            UNKNOWN_CLIENT.to_string()
        }
    }
}

/// Middleware rejecting over-limit clients with `429 Too Many Requests`.
pub async fn rate_limit(
    Extension(state): Extension<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    if !state.limiter.allow(&ip) {
        warn!(ip = %ip, "rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    }

    next.run(request).await
}
