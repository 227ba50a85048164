use axum::{extract::Extension, http::HeaderMap};

use super::{render, require_user, Page, PageResult};
use crate::api::AppState;
use crate::auth::CurrentIdentity;

pub async fn dashboard(
    Extension(state): Extension<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> PageResult {
    let user = match require_user(identity) {
        Ok(user) => user,
        Err(outcome) => return Ok(outcome),
    };
    render(&state, &headers, Page::new("Dashboard").with_user(user))
}
