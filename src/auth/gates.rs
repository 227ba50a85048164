//! Capability gates: "authenticated" and "verified" checks.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::identity::{CurrentIdentity, Identity};

pub const LOGIN_PATH: &str = "/login";
pub const VERIFY_EMAIL_PATH: &str = "/verify-email";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Pass,
    Redirect(&'static str),
}

#[must_use]
pub fn require_authenticated(identity: &Identity) -> Gate {
    match identity {
        Identity::User(user) if user.id != 0 && !user.email.is_empty() => Gate::Pass,
        _ => Gate::Redirect(LOGIN_PATH),
    }
}

#[must_use]
pub fn require_verified(identity: &Identity) -> Gate {
    match require_authenticated(identity) {
        Gate::Pass => match identity.user() {
            Some(user) if user.email_verified => Gate::Pass,
            _ => Gate::Redirect(VERIFY_EMAIL_PATH),
        },
        redirect @ Gate::Redirect(_) => redirect,
    }
}

async fn guard(gate: Gate, request: Request, next: Next) -> Response {
    match gate {
        Gate::Pass => next.run(request).await,
        Gate::Redirect(to) => Redirect::to(to).into_response(),
    }
}

pub async fn authenticated_only(
    CurrentIdentity(identity): CurrentIdentity,
    request: Request,
    next: Next,
) -> Response {
    guard(require_authenticated(&identity), request, next).await
}

pub async fn verified_only(
    CurrentIdentity(identity): CurrentIdentity,
    request: Request,
    next: Next,
) -> Response {
    guard(require_verified(&identity), request, next).await
}
