//! Identity and abuse control.
//!
//! Request flow: [`rate_limit::rate_limit`] → [`identity::resolve_identity`] →
//! [`csrf::csrf_protect`] → [`gates`] → handler. Handlers call into the [`tokens::TokenLedger`] and the
//! [`password`] hasher.
//!
//! ## Sessions
//!
//! Sessions are signed cookies holding a small key/value bag (the user id and any
//! pending flash messages). Rotating the session secret logs everyone out.
//!
//! ## Tokens
//!
//! Verification, reset and email-change codes are single use. Redemption looks at
//! the newest unexpired code only, and a successful redemption revokes the older
//! ones for the same purpose.

pub mod config;
pub mod csrf;
pub mod gates;
pub mod identity;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod tokens;

pub use config::AuthConfig;
pub use identity::{CurrentIdentity, Identity};
pub use rate_limit::RateLimiter;
pub use session::{CookieSessionStore, SessionStore};
pub use tokens::{TokenError, TokenLedger};
