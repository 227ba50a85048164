//! Cross-site request forgery protection.
//!
//! Each browser session holds one random token under [`CSRF_KEY`]. Rendered pages
//! expose it as `csrf`, and every state-changing request must send it back either
//! as the `csrf` form field or in the `X-CSRF-Token` header. Multipart bodies are
//! not buffered here, so uploads use the header.

use anyhow::Context;
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header::CONTENT_TYPE, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use super::session::SessionBag;
use crate::api::AppState;

pub use super::session::CSRF_KEY;

pub const CSRF_FIELD: &str = "csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

const TOKEN_BYTES: usize = 32;
const MAX_FORM_BYTES: usize = 64 * 1024;

/// 256 random bits, base64url without padding.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_csrf_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate CSRF token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// The bag's token, creating one when missing. The flag is `true` when the bag
/// changed and needs saving.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn ensure_csrf_token(bag: &mut SessionBag) -> anyhow::Result<(String, bool)> {
    if let Some(token) = bag.csrf_token() {
        return Ok((token.to_string(), false));
    }
    let token = generate_csrf_token()?;
    bag.set_csrf_token(token.clone());
    Ok((token, true))
}

#[must_use]
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn is_urlencoded(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

fn form_token(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == CSRF_FIELD)
        .map(|(_, value)| value.into_owned())
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden - CSRF token invalid").into_response()
}

/// Middleware rejecting unsafe requests whose token does not match the session.
pub async fn csrf_protect(
    Extension(state): Extension<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_safe(request.method()) {
        return next.run(request).await;
    }

    let expected = match state.sessions.load(request.headers()) {
        Ok(bag) => bag.csrf_token().map(ToString::to_string),
        Err(err) => {
            error!("Failed to load session for CSRF check: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let Some(expected) = expected else {
        warn!(path = %request.uri().path(), "CSRF token missing from session");
        return forbidden();
    };

    let header = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let (presented, request) = match header {
        Some(token) => (Some(token), request),
        None if is_urlencoded(&request) => {
            let (parts, body) = request.into_parts();
            let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("Failed to read form body: {err}");
                    return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
                }
            };
            let token = form_token(&bytes);
            (token, Request::from_parts(parts, Body::from(bytes)))
        }
        None => (None, request),
    };

    match presented {
        Some(token) if tokens_match(&expected, &token) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "CSRF token mismatch");
            forbidden()
        }
        None => {
            warn!(path = %request.uri().path(), "CSRF token missing from request");
            forbidden()
        }
    }
}
