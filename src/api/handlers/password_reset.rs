//! Forgotten password flow.
//!
//! `POST /forgot-password` mails a reset code to the address (when it belongs to
//! an account) and always continues to `/reset-password?email=…`, so the response
//! does not reveal which emails are registered. `POST /reset-password` redeems the
//! code and stores the new password.

use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    Form,
};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{
    hash_blocking, notify, redirect_with_flash, render, signed_in_redirect,
    validation::{
        validate_confirmation, validate_email, validate_password, validate_token, ValidationError,
    },
    Page, PageOutcome, PageResult, INVALID_TOKEN_MESSAGE,
};
use crate::api::AppState;
use crate::auth::{gates::LOGIN_PATH, session::FlashLevel, CurrentIdentity};
use crate::email::{encode_query, password_reset_email};
use crate::store::{TokenPurpose, UserUpdate};

const TITLE: &str = "Reset Password";

#[derive(Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
pub struct ResetQuery {
    email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    new_password: String,
    #[serde(default)]
    confirm_password: String,
}

#[instrument(skip_all)]
pub async fn forgot(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<ForgotPasswordForm>,
) -> PageResult {
    if let Some(redirect) = signed_in_redirect(&identity) {
        return Ok(redirect);
    }

    let mut errors = ValidationError::default();
    errors.check("email", validate_email(&form.email));
    if let Err(err) = errors.finish() {
        let page = Page::new("Login").with_value("resetEmail", &form.email).invalid(err);
        return render(&state, &headers, page);
    }

    if state.store.find_user_by_email(&form.email).await?.is_some() {
        let token = state
            .tokens
            .issue(
                None,
                &form.email,
                TokenPurpose::PasswordReset,
                state.config.reset_ttl(),
            )
            .await?;
        notify(
            &state,
            &password_reset_email(&form.email, &token.token, state.config.base_url()),
        );
    } else {
        debug!("password reset requested for unknown email");
    }

    Ok(PageOutcome::redirect(format!(
        "/reset-password?email={}",
        encode_query(&form.email)
    )))
}

pub async fn page(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Query(query): Query<ResetQuery>,
    headers: HeaderMap,
) -> PageResult {
    if let Some(redirect) = signed_in_redirect(&identity) {
        return Ok(redirect);
    }
    let page = Page::new(TITLE).with_value("email", query.email.unwrap_or_default());
    render(&state, &headers, page)
}

#[instrument(skip_all)]
pub async fn reset(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<ResetPasswordForm>,
) -> PageResult {
    if let Some(redirect) = signed_in_redirect(&identity) {
        return Ok(redirect);
    }

    let mut errors = ValidationError::default();
    errors.check("email", validate_email(&form.email));
    errors.check("token", validate_token(&form.token));
    errors.check("newPassword", validate_password(&form.new_password));
    errors.check(
        "confirmPassword",
        validate_confirmation(&form.new_password, &form.confirm_password),
    );
    let page = || Page::new(TITLE).with_value("email", &form.email);
    if let Err(err) = errors.finish() {
        return render(&state, &headers, page().invalid(err));
    }

    match state
        .tokens
        .redeem(None, &form.email, TokenPurpose::PasswordReset, &form.token)
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_rejection() => {
            debug!("password reset token rejected: {err}");
            let failed = page().with_error("token", INVALID_TOKEN_MESSAGE);
            return render(&state, &headers, failed);
        }
        Err(err) => return Err(err.into()),
    }

    let Some(user) = state.store.find_user_by_email(&form.email).await? else {
        warn!("password reset redeemed for a missing account");
        let failed = page().with_error("form", "could not update password");
        return render(&state, &headers, failed);
    };

    let password_hash = hash_blocking(form.new_password.clone()).await?;
    let update = UserUpdate {
        password_hash: Some(password_hash),
        ..UserUpdate::default()
    };
    if !state.store.update_user(user.id, update).await? {
        let failed = page().with_error("form", "could not update password");
        return render(&state, &headers, failed);
    }

    debug!(user_id = user.id, "Password reset");
    redirect_with_flash(
        &state,
        &headers,
        LOGIN_PATH,
        FlashLevel::Success,
        "Your password has been reset, please log in",
    )
}

