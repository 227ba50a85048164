use axum::{extract::Extension, http::HeaderMap, Form};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    render, signed_in_redirect,
    validation::{validate_email, validate_password, ValidationError},
    verify_blocking, Page, PageOutcome, PageResult, DASHBOARD_PATH,
};
use crate::api::AppState;
use crate::auth::{session::log_in, CurrentIdentity};

const TITLE: &str = "Login";
const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub async fn page(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> PageResult {
    if let Some(redirect) = signed_in_redirect(&identity) {
        return Ok(redirect);
    }
    render(&state, &headers, Page::new(TITLE))
}

#[instrument(skip_all)]
pub async fn login(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> PageResult {
    if let Some(redirect) = signed_in_redirect(&identity) {
        return Ok(redirect);
    }

    let mut errors = ValidationError::default();
    errors.check("email", validate_email(&form.email));
    errors.check("password", validate_password(&form.password));
    if let Err(err) = errors.finish() {
        let page = Page::new(TITLE).with_value("email", &form.email).invalid(err);
        return render(&state, &headers, page);
    }

    let failed = || {
        Page::new(TITLE)
            .with_value("email", &form.email)
            .with_error("form", INVALID_CREDENTIALS)
    };

    let Some(user) = state.store.find_user_by_email(&form.email).await? else {
        debug!("login for unknown email");
        return render(&state, &headers, failed());
    };

    if !verify_blocking(user.password_hash.clone(), form.password.clone()).await? {
        debug!(user_id = user.id, "password verification failed");
        return render(&state, &headers, failed());
    }

    let cookie = log_in(state.sessions.as_ref(), &headers, user.id)?;
    debug!(user_id = user.id, "User logged in");
    Ok(PageOutcome::redirect(DASHBOARD_PATH).with_cookie(cookie))
}
