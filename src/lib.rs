//! # Warden (sessions, single-use tokens and abuse control)
//!
//! `warden` is the authentication core of a server-rendered web application.
//!
//! ## Sessions
//!
//! Each request carries a signed cookie holding a small key/value bag. A valid
//! `user_id` in the bag resolves to a [`store::User`]; anything else is anonymous.
//! A cookie with a bad signature is an error, not an anonymous request.
//!
//! ## Gates
//!
//! Routes are protected by two gates: *authenticated* (a resolved user) and
//! *verified* (an authenticated user whose email is confirmed). Failing a gate
//! redirects with `303 See Other` to `/login` or `/verify-email`.
//!
//! ## Tokens
//!
//! Email verification, password reset and email change use single-use codes
//! scoped to an email address and purpose. Only the newest unexpired code is
//! accepted; redeeming it revokes the others.
//!
//! ## Rate limiting
//!
//! Every request passes a per-client token bucket keyed by the first
//! `X-Forwarded-For` hop or the peer address. Rejections answer `429`.
//!
//! ## Forgery protection
//!
//! Rendered pages carry a per-session CSRF token; every state-changing request
//! must echo it back or is refused with `403`.
//!
//! ## Storage
//!
//! Users and tokens live behind [`store::RecordStore`], backed by PostgreSQL or an
//! in-memory map selected by the DSN scheme. Profile pictures go through
//! [`storage::Storer`] and are served under `/uploads/` to verified users.

pub mod api;
pub mod auth;
pub mod cli;
pub mod email;
pub mod storage;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
