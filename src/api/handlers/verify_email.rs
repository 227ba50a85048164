//! Email verification for signed-in, unverified users.

use axum::{extract::Extension, http::HeaderMap, Form};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    notify, redirect_with_flash, render, require_user,
    validation::{validate_token, ValidationError},
    Page, PageOutcome, PageResult, DASHBOARD_PATH, INVALID_TOKEN_MESSAGE,
};
use crate::api::AppState;
use crate::auth::{gates::VERIFY_EMAIL_PATH, session::FlashLevel, CurrentIdentity, Identity};
use crate::email::verification_email;
use crate::store::{TokenPurpose, User, UserUpdate};

const TITLE: &str = "Verify Email";

#[derive(Deserialize)]
pub struct VerifyEmailForm {
    #[serde(default)]
    token: String,
}

/// Anonymous callers go to the login page, verified users to the dashboard.
fn unverified_user(identity: Identity) -> Result<User, PageOutcome> {
    let user = require_user(identity)?;
    if user.email_verified {
        return Err(PageOutcome::redirect(DASHBOARD_PATH));
    }
    Ok(user)
}

pub async fn page(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> PageResult {
    let user = match unverified_user(identity) {
        Ok(user) => user,
        Err(outcome) => return Ok(outcome),
    };
    render(&state, &headers, Page::new(TITLE).with_user(user))
}

#[instrument(skip_all)]
pub async fn verify(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<VerifyEmailForm>,
) -> PageResult {
    let user = match unverified_user(identity) {
        Ok(user) => user,
        Err(outcome) => return Ok(outcome),
    };

    let mut errors = ValidationError::default();
    errors.check("token", validate_token(&form.token));
    if let Err(err) = errors.finish() {
        return render(&state, &headers, Page::new(TITLE).with_user(user).invalid(err));
    }

    match state
        .tokens
        .redeem(
            Some(user.id),
            &user.email,
            TokenPurpose::EmailVerification,
            &form.token,
        )
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_rejection() => {
            debug!(user_id = user.id, "verification token rejected: {err}");
            let page = Page::new(TITLE)
                .with_user(user)
                .with_error("token", INVALID_TOKEN_MESSAGE);
            return render(&state, &headers, page);
        }
        Err(err) => return Err(err.into()),
    }

    let update = UserUpdate {
        email_verified: Some(true),
        ..UserUpdate::default()
    };
    state.store.update_user(user.id, update).await?;

    debug!(user_id = user.id, "Email verified");
    redirect_with_flash(
        &state,
        &headers,
        DASHBOARD_PATH,
        FlashLevel::Success,
        "Your email has been verified",
    )
}

#[instrument(skip_all)]
pub async fn resend(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> PageResult {
    let user = match unverified_user(identity) {
        Ok(user) => user,
        Err(outcome) => return Ok(outcome),
    };

    let token = state
        .tokens
        .issue(
            Some(user.id),
            &user.email,
            TokenPurpose::EmailVerification,
            state.config.verification_ttl(),
        )
        .await?;
    notify(
        &state,
        &verification_email(&user.email, &token.token, state.config.base_url()),
    );

    redirect_with_flash(
        &state,
        &headers,
        VERIFY_EMAIL_PATH,
        FlashLevel::Info,
        "Verification email resent. Please check your inbox.",
    )
}
