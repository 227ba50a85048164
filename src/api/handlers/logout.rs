use axum::{extract::Extension, http::HeaderMap};
use tracing::debug;

use super::{PageOutcome, PageResult};
use crate::api::AppState;
use crate::auth::{gates::LOGIN_PATH, session::log_out};

pub async fn logout(Extension(state): Extension<AppState>, headers: HeaderMap) -> PageResult {
    let cookie = log_out(state.sessions.as_ref(), &headers)?;
    debug!("User logged out");
    Ok(PageOutcome::redirect(LOGIN_PATH).with_cookie(cookie))
}
