use axum::{extract::Extension, http::HeaderMap, Form};
use serde::Deserialize;
use tracing::{debug, error, instrument};

use super::{
    hash_blocking, notify, render, signed_in_redirect,
    validation::{validate_confirmation, validate_email, validate_password, ValidationError},
    Page, PageOutcome, PageResult, DASHBOARD_PATH,
};
use crate::api::AppState;
use crate::auth::{session::log_in, CurrentIdentity};
use crate::email::verification_email;
use crate::store::{NewUser, StoreError, TokenPurpose};

const TITLE: &str = "Sign Up";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
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

/// Create an unverified account, sign it in and mail a verification code.
#[instrument(skip_all)]
pub async fn signup(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<SignupForm>,
) -> PageResult {
    if let Some(redirect) = signed_in_redirect(&identity) {
        return Ok(redirect);
    }

    let mut errors = ValidationError::default();
    errors.check("email", validate_email(&form.email));
    errors.check("password", validate_password(&form.password));
    errors.check(
        "confirmPassword",
        validate_confirmation(&form.password, &form.confirm_password),
    );
    if let Err(err) = errors.finish() {
        let page = Page::new(TITLE).with_value("email", &form.email).invalid(err);
        return render(&state, &headers, page);
    }

    let password_hash = hash_blocking(form.password).await?;
    let user = match state
        .store
        .create_user(NewUser {
            email: form.email.clone(),
            password_hash,
        })
        .await
    {
        Ok(user) => user,
        Err(StoreError::Conflict) => {
            let page = Page::new(TITLE)
                .with_value("email", &form.email)
                .with_error("email", "email is already registered");
            return render(&state, &headers, page);
        }
        Err(err) => return Err(err.into()),
    };

    let cookie = log_in(state.sessions.as_ref(), &headers, user.id)?;

    match state
        .tokens
        .issue(
            Some(user.id),
            &user.email,
            TokenPurpose::EmailVerification,
            state.config.verification_ttl(),
        )
        .await
    {
        Ok(token) => notify(
            &state,
            &verification_email(&user.email, &token.token, state.config.base_url()),
        ),
        // The user can ask for a new code from the verification page.
        Err(err) => error!(user_id = user.id, "Failed to issue verification token: {err}"),
    }

    debug!(user_id = user.id, "User signed up");
    Ok(PageOutcome::redirect(DASHBOARD_PATH).with_cookie(cookie))
}
