//! Page handlers.
//!
//! Every page follows the same shape: resolve the caller, validate the form, act,
//! then answer with a [`PageOutcome`] (redirect, render, or not found). Pages are
//! rendered as a JSON view model; templating is left to whatever sits in front.

pub mod account;
pub mod dashboard;
pub mod health;
pub mod login;
pub mod logout;
pub mod password_reset;
pub mod root;
pub mod signup;
pub mod uploads;
pub mod validation;
pub mod verify_email;

use anyhow::Context;
use axum::{
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, warn};

use crate::api::AppState;
use crate::auth::{
    csrf::ensure_csrf_token,
    gates::{LOGIN_PATH, VERIFY_EMAIL_PATH},
    password::{hash_password, verify_password},
    session::{Flash, FlashLevel},
    Identity,
};
use crate::email::EmailMessage;
use crate::store::User;
use validation::ValidationError;

pub const DASHBOARD_PATH: &str = "/dashboard";
pub const ACCOUNT_PATH: &str = "/account";
pub const INVALID_TOKEN_MESSAGE: &str = "invalid or expired token";

/// Internal failure: logged, answered with an opaque 500.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("internal error: {:?}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// View model handed to the renderer.
#[derive(Debug, Default, Serialize)]
pub struct Page {
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub flashes: Vec<Flash>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<&'static str, String>,
    /// Echoed back by forms as the `csrf` field.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub csrf: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl Page {
    #[must_use]
    pub fn new(title: &'static str) -> Self {
        Self {
            title,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// A form-level error; the page is answered with `400`.
    #[must_use]
    pub fn with_error(mut self, field: &'static str, message: impl Into<String>) -> Self {
        self.errors.insert(field, message.into());
        self.status = StatusCode::BAD_REQUEST;
        self
    }

    #[must_use]
    pub fn invalid(mut self, err: ValidationError) -> Self {
        self.errors.insert("form", err.to_string());
        self.errors.extend(err.fields);
        self.status = StatusCode::BAD_REQUEST;
        self
    }
}

#[derive(Debug)]
enum Outcome {
    Redirect(String),
    Render(Page),
    NotFound,
}

/// Result of a page handler, plus the session cookie to set if it changed.
#[derive(Debug)]
pub struct PageOutcome {
    outcome: Outcome,
    set_cookie: Option<HeaderValue>,
}

impl PageOutcome {
    #[must_use]
    pub fn redirect(to: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Redirect(to.into()),
            set_cookie: None,
        }
    }

    #[must_use]
    pub fn render(page: Page) -> Self {
        Self {
            outcome: Outcome::Render(page),
            set_cookie: None,
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self {
            outcome: Outcome::NotFound,
            set_cookie: None,
        }
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: HeaderValue) -> Self {
        self.set_cookie = Some(cookie);
        self
    }
}

impl IntoResponse for PageOutcome {
    fn into_response(self) -> Response {
        let mut response = match self.outcome {
            Outcome::Redirect(to) => Redirect::to(&to).into_response(),
            Outcome::Render(page) => (page.status, Json(page)).into_response(),
            Outcome::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        };
        if let Some(cookie) = self.set_cookie {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        response
    }
}

pub type PageResult = Result<PageOutcome, AppError>;

/// Render `page`, draining pending flash messages into it and handing out the
/// session's CSRF token (issued on first use).
pub(crate) fn render(state: &AppState, headers: &HeaderMap, mut page: Page) -> PageResult {
    let mut bag = state.sessions.load(headers)?;
    let (csrf, issued) = ensure_csrf_token(&mut bag)?;
    page.csrf = csrf;
    page.flashes = bag.take_flashes();
    if !issued && page.flashes.is_empty() {
        return Ok(PageOutcome::render(page));
    }
    let cookie = state.sessions.save(&bag)?;
    Ok(PageOutcome::render(page).with_cookie(cookie))
}

/// Redirect after queueing a flash message for the next page.
pub(crate) fn redirect_with_flash(
    state: &AppState,
    headers: &HeaderMap,
    to: &str,
    level: FlashLevel,
    message: &str,
) -> PageResult {
    let mut bag = state.sessions.load(headers)?;
    bag.push_flash(level, message);
    let cookie = state.sessions.save(&bag)?;
    Ok(PageOutcome::redirect(to).with_cookie(cookie))
}

/// Where a signed-in caller belongs when visiting a guest-only page.
pub(crate) fn signed_in_redirect(identity: &Identity) -> Option<PageOutcome> {
    identity.user().map(|user| {
        if user.email_verified {
            PageOutcome::redirect(DASHBOARD_PATH)
        } else {
            PageOutcome::redirect(VERIFY_EMAIL_PATH)
        }
    })
}

/// The signed-in user, or a redirect to the login page.
pub(crate) fn require_user(identity: Identity) -> Result<User, PageOutcome> {
    match identity {
        Identity::User(user) => Ok(user),
        Identity::Anonymous => Err(PageOutcome::redirect(LOGIN_PATH)),
    }
}

/// Argon2 is CPU-bound; keep it off the async workers.
pub(crate) async fn hash_blocking(password: String) -> Result<String, AppError> {
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")??;
    Ok(hashed)
}

pub(crate) async fn verify_blocking(encoded: String, password: String) -> Result<bool, AppError> {
    let verified = tokio::task::spawn_blocking(move || verify_password(&encoded, &password))
        .await
        .context("password verification task failed")?;
    Ok(verified)
}

/// Send a message; delivery failures are logged and never fail the request.
pub(crate) fn notify(state: &AppState, message: &EmailMessage) {
    if let Err(err) = state.notifier.send(message) {
        warn!(subject = %message.subject, "Failed to send email: {err:#}");
    }
}
