//! Auth configuration: lifetimes, cookie policy and limiter parameters.

use chrono::Duration;
use std::time::Duration as StdDuration;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_RESET_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_EMAIL_CHANGE_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_RATE_LIMIT_RPS: f64 = 5.0;
const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
const DEFAULT_RATE_LIMIT_EXPIRY_SECONDS: u64 = 3 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    session_ttl_seconds: i64,
    verification_ttl_seconds: i64,
    reset_ttl_seconds: i64,
    email_change_ttl_seconds: i64,
    rate_limit_rps: f64,
    rate_limit_burst: u32,
    rate_limit_expiry_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            email_change_ttl_seconds: DEFAULT_EMAIL_CHANGE_TTL_SECONDS,
            rate_limit_rps: DEFAULT_RATE_LIMIT_RPS,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_expiry_seconds: DEFAULT_RATE_LIMIT_EXPIRY_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_change_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_change_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rps: f64, burst: u32, expiry_seconds: u64) -> Self {
        self.rate_limit_rps = rps;
        self.rate_limit_burst = burst;
        self.rate_limit_expiry_seconds = expiry_seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn verification_ttl(&self) -> Duration {
        Duration::seconds(self.verification_ttl_seconds)
    }

    #[must_use]
    pub fn reset_ttl(&self) -> Duration {
        Duration::seconds(self.reset_ttl_seconds)
    }

    #[must_use]
    pub fn email_change_ttl(&self) -> Duration {
        Duration::seconds(self.email_change_ttl_seconds)
    }

    #[must_use]
    pub fn rate_limit_rps(&self) -> f64 {
        self.rate_limit_rps
    }

    #[must_use]
    pub fn rate_limit_burst(&self) -> u32 {
        self.rate_limit_burst
    }

    #[must_use]
    pub fn rate_limit_expiry(&self) -> StdDuration {
        StdDuration::from_secs(self.rate_limit_expiry_seconds)
    }

    /// Only mark cookies secure when the site is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}
