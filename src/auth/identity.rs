//! Caller identity resolution.
//!
//! Flow Overview: read the session cookie, look up the user it names, and attach
//! the resulting [`Identity`] to the request extensions. Gates and handlers read
//! it back through [`CurrentIdentity`] instead of touching the session again.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use tracing::{debug, error};

use super::session::{SessionError, SessionStore};
use crate::api::AppState;
use crate::store::{RecordStore, StoreError, User};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl Identity {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::User(user) => Some(user),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolve the caller from request headers.
///
/// A session naming a user that no longer exists resolves to `Anonymous` and is
/// left as is; only unreadable sessions and store failures are errors.
///
/// # Errors
/// `ResolveError` when the session cannot be trusted or the store fails.
pub async fn resolve(
    sessions: &dyn SessionStore,
    store: &dyn RecordStore,
    headers: &HeaderMap,
) -> Result<Identity, ResolveError> {
    let bag = sessions.load(headers)?;
    let Some(user_id) = bag.user_id() else {
        return Ok(Identity::Anonymous);
    };

    match store.find_user_by_id(user_id).await? {
        Some(user) => Ok(Identity::User(user)),
        None => {
            debug!(user_id, "session names an unknown user");
            Ok(Identity::Anonymous)
        }
    }
}

/// Middleware attaching the caller's [`Identity`] to every request.
pub async fn resolve_identity(
    Extension(state): Extension<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve(state.sessions.as_ref(), state.store.as_ref(), request.headers()).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            error!("Failed to resolve identity: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Extractor for the identity attached by [`resolve_identity`].
#[derive(Clone, Debug)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Self)
            .ok_or_else(|| {
                error!("identity missing from request extensions");
                StatusCode::INTERNAL_SERVER_ERROR
            })
    }
}
