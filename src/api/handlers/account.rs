//! Account management for verified users: password, email and profile changes.
//!
//! Email changes take two steps. `POST /account/email/request` mails a code to
//! the new address; `POST /account/email` redeems it and switches the address.

use axum::{
    extract::{multipart::MultipartError, Extension, Multipart},
    http::{HeaderMap, StatusCode},
    Form,
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, error, instrument, warn};
use ulid::Ulid;

use super::{
    hash_blocking, notify, redirect_with_flash, render, require_user,
    validation::{
        validate_confirmation, validate_email, validate_name, validate_password, validate_token,
        ValidationError,
    },
    verify_blocking, Page, PageResult, ACCOUNT_PATH, INVALID_TOKEN_MESSAGE,
};
use crate::api::AppState;
use crate::auth::{session::FlashLevel, CurrentIdentity};
use crate::email::email_change_email;
use crate::store::{StoreError, TokenPurpose, User, UserUpdate};

const TITLE: &str = "Account";
const EMAIL_IN_USE: &str = "email is already in use";
const PICTURE_REQUIRED: &str = "picture is required";
const PICTURE_TOO_LARGE: &str = "picture size exceeds 5MB limit";
const PROFILE_FAILED: &str = "could not update user profile";

pub const MAX_PICTURE_BYTES: usize = 5 * 1024 * 1024;
/// Request body cap for the profile form: the picture plus room for the other parts.
pub const PROFILE_BODY_LIMIT: usize = MAX_PICTURE_BYTES + 64 * 1024;
pub const UPLOADS_PREFIX: &str = "/uploads/";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordForm {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
    #[serde(default)]
    confirm_password: String,
}

#[derive(Deserialize)]
pub struct ChangeEmailForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    token: String,
}

macro_rules! signed_in {
    ($identity:expr) => {
        match require_user($identity) {
            Ok(user) => user,
            Err(outcome) => return Ok(outcome),
        }
    };
}

pub async fn account(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> PageResult {
    let user = signed_in!(identity);
    render(&state, &headers, Page::new(TITLE).with_user(user))
}

#[instrument(skip_all)]
pub async fn change_password(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<ChangePasswordForm>,
) -> PageResult {
    let user = signed_in!(identity);

    let mut errors = ValidationError::default();
    errors.check("currentPassword", validate_password(&form.current_password));
    errors.check("newPassword", validate_password(&form.new_password));
    errors.check(
        "confirmPassword",
        validate_confirmation(&form.new_password, &form.confirm_password),
    );
    if let Err(err) = errors.finish() {
        return render(&state, &headers, Page::new(TITLE).with_user(user).invalid(err));
    }

    if !verify_blocking(user.password_hash.clone(), form.current_password).await? {
        debug!(user_id = user.id, "current password mismatch");
        let page = Page::new(TITLE)
            .with_user(user)
            .with_error("currentPassword", "please enter your current password");
        return render(&state, &headers, page);
    }

    let password_hash = hash_blocking(form.new_password).await?;
    let update = UserUpdate {
        password_hash: Some(password_hash),
        ..UserUpdate::default()
    };
    state.store.update_user(user.id, update).await?;

    redirect_with_flash(
        &state,
        &headers,
        ACCOUNT_PATH,
        FlashLevel::Success,
        "Your password has been changed",
    )
}

#[instrument(skip_all)]
pub async fn request_email_change(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<ChangeEmailForm>,
) -> PageResult {
    let user = signed_in!(identity);

    let mut errors = ValidationError::default();
    errors.check("email", validate_email(&form.email));
    if let Err(err) = errors.finish() {
        return render(&state, &headers, Page::new(TITLE).with_user(user).invalid(err));
    }

    if state.store.find_user_by_email(&form.email).await?.is_some() {
        let page = Page::new(TITLE)
            .with_user(user)
            .with_value("email", &form.email)
            .with_error("email", EMAIL_IN_USE);
        return render(&state, &headers, page);
    }

    let token = state
        .tokens
        .issue(
            Some(user.id),
            &form.email,
            TokenPurpose::EmailChange,
            state.config.email_change_ttl(),
        )
        .await?;
    notify(
        &state,
        &email_change_email(&form.email, &token.token, state.config.base_url()),
    );

    redirect_with_flash(
        &state,
        &headers,
        ACCOUNT_PATH,
        FlashLevel::Info,
        "Verification email sent. Please check your inbox.",
    )
}

#[instrument(skip_all)]
pub async fn change_email(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    Form(form): Form<ChangeEmailForm>,
) -> PageResult {
    let user = signed_in!(identity);

    let mut errors = ValidationError::default();
    errors.check("email", validate_email(&form.email));
    errors.check("token", validate_token(&form.token));
    if let Err(err) = errors.finish() {
        let page = Page::new(TITLE)
            .with_user(user)
            .with_value("email", &form.email)
            .invalid(err);
        return render(&state, &headers, page);
    }

    match state
        .tokens
        .redeem(Some(user.id), &form.email, TokenPurpose::EmailChange, &form.token)
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_rejection() => {
            debug!(user_id = user.id, "email change token rejected: {err}");
            let page = Page::new(TITLE)
                .with_user(user)
                .with_value("email", &form.email)
                .with_error("token", INVALID_TOKEN_MESSAGE);
            return render(&state, &headers, page);
        }
        Err(err) => return Err(err.into()),
    }

    let update = UserUpdate {
        email: Some(form.email.clone()),
        ..UserUpdate::default()
    };
    match state.store.update_user(user.id, update).await {
        Ok(_) => {}
        Err(StoreError::Conflict) => {
            let page = Page::new(TITLE)
                .with_user(user)
                .with_value("email", &form.email)
                .with_error("email", EMAIL_IN_USE);
            return render(&state, &headers, page);
        }
        Err(err) => return Err(err.into()),
    }

    debug!(user_id = user.id, "Email changed");
    redirect_with_flash(
        &state,
        &headers,
        ACCOUNT_PATH,
        FlashLevel::Success,
        "Your email has been changed",
    )
}

/// Upload a new profile picture together with the display name.
///
/// The form is `multipart/form-data` with `name` and `picture` parts. The file
/// is stored as `profile/{ulid}{ext}` and served back under `/uploads/`.
#[instrument(skip_all)]
pub async fn update_profile(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
    multipart: Multipart,
) -> PageResult {
    let user = signed_in!(identity);

    let form = match read_profile_form(multipart).await {
        Ok(form) => form,
        Err(message) => {
            let page = Page::new(TITLE).with_user(user).with_error("picture", message);
            return render(&state, &headers, page);
        }
    };

    let mut errors = ValidationError::default();
    errors.check("name", validate_name(&form.name));
    errors.check("picture", validate_picture(form.picture.as_ref()));
    if let Err(err) = errors.finish() {
        let page = Page::new(TITLE)
            .with_user(user)
            .with_value("name", &form.name)
            .invalid(err);
        return render(&state, &headers, page);
    }
    let failed = |user: User, field: &'static str, message: &'static str| {
        Page::new(TITLE)
            .with_user(user)
            .with_value("name", &form.name)
            .with_error(field, message)
    };
    let Some(picture) = form.picture else {
        return render(&state, &headers, failed(user, "picture", PICTURE_REQUIRED));
    };

    let file_name = format!("profile/{}{}", Ulid::new(), picture_extension(&picture.file_name));
    if let Err(err) = state.storer.write(&file_name, &picture.bytes).await {
        error!(user_id = user.id, "Failed to store profile picture: {err}");
        return render(&state, &headers, failed(user, "form", PROFILE_FAILED));
    }

    let update = UserUpdate {
        name: Some(form.name.trim().to_string()),
        picture: Some(format!("{UPLOADS_PREFIX}{file_name}")),
        ..UserUpdate::default()
    };
    if let Err(err) = state.store.update_user(user.id, update).await {
        error!(user_id = user.id, "Failed to update user profile: {err}");
        if let Err(err) = state.storer.remove(&file_name).await {
            warn!(file_name = %file_name, "Failed to remove orphaned picture: {err}");
        }
        return render(&state, &headers, failed(user, "form", PROFILE_FAILED));
    }

    if let Some(previous) = user.picture.as_deref().and_then(|p| p.strip_prefix(UPLOADS_PREFIX)) {
        if let Err(err) = state.storer.remove(previous).await {
            warn!(user_id = user.id, "Failed to remove previous picture: {err}");
        }
    }

    debug!(user_id = user.id, file_name = %file_name, "Profile updated");
    redirect_with_flash(
        &state,
        &headers,
        ACCOUNT_PATH,
        FlashLevel::Success,
        "Your profile has been updated",
    )
}

struct Picture {
    file_name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct ProfileForm {
    name: String,
    picture: Option<Picture>,
}

/// Collect the profile parts. Reading stops one byte past the picture limit, so
/// oversized uploads are reported without buffering them whole.
async fn read_profile_form(mut multipart: Multipart) -> Result<ProfileForm, &'static str> {
    let mut form = ProfileForm::default();
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_message(&err)),
        };
        let part = field.name().map(ToString::to_string);
        match part.as_deref() {
            Some("name") => {
                form.name = field.text().await.map_err(|err| multipart_message(&err))?;
            }
            Some("picture") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mut bytes = Vec::new();
                while let Some(chunk) =
                    field.chunk().await.map_err(|err| multipart_message(&err))?
                {
                    bytes.extend_from_slice(&chunk);
                    if bytes.len() > MAX_PICTURE_BYTES {
                        break;
                    }
                }
                if !bytes.is_empty() {
                    form.picture = Some(Picture { file_name, bytes });
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

fn validate_picture(picture: Option<&Picture>) -> Result<(), &'static str> {
    match picture {
        None => Err(PICTURE_REQUIRED),
        Some(picture) if picture.bytes.len() > MAX_PICTURE_BYTES => Err(PICTURE_TOO_LARGE),
        Some(_) => Ok(()),
    }
}

fn multipart_message(err: &MultipartError) -> &'static str {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PICTURE_TOO_LARGE
    } else {
        "could not read the upload"
    }
}

/// The upload's extension, lowercased, when it is short and alphanumeric.
fn picture_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}
