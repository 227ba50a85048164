use axum::response::{IntoResponse, Redirect};

use super::{PageOutcome, DASHBOARD_PATH};

pub async fn root() -> impl IntoResponse {
    Redirect::to(DASHBOARD_PATH)
}

pub async fn not_found() -> PageOutcome {
    PageOutcome::not_found()
}
