//! Uploaded files, served to verified users only.

use axum::{
    extract::{Extension, Path},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::AppError;
use crate::api::AppState;
use crate::storage::{content_type, StorageError};

pub async fn serve(
    Extension(state): Extension<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let bytes = match state.storer.read(&name).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok((StatusCode::NOT_FOUND, "Not Found").into_response()),
        Err(StorageError::InvalidName(name)) => {
            debug!(name = %name, "rejected upload path");
            return Ok((StatusCode::NOT_FOUND, "Not Found").into_response());
        }
        Err(err) => return Err(err.into()),
    };

    Ok((
        [
            (CONTENT_TYPE, content_type(&name)),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (CACHE_CONTROL, "private, max-age=3600"),
        ],
        bytes,
    )
        .into_response())
}
