use crate::{
    api::handlers::{
        account, dashboard, health, login, logout, password_reset, root, signup, uploads,
        verify_email,
    },
    auth::{
        csrf::csrf_protect, gates::verified_only, identity::resolve_identity,
        rate_limit::rate_limit, AuthConfig, CookieSessionStore, RateLimiter, SessionStore,
        TokenLedger,
    },
    email::{LogNotifier, Notifier},
    storage::{FsStorer, Storer},
    store::{self, RecordStore},
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use secrecy::SecretString;
use std::{any::Any, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;

pub mod handlers;

/// Collaborators shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub storer: Arc<dyn Storer>,
    pub limiter: Arc<RateLimiter>,
    pub tokens: TokenLedger,
    pub config: Arc<AuthConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        storer: Arc<dyn Storer>,
        config: AuthConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_rps(),
            config.rate_limit_burst(),
            config.rate_limit_expiry(),
        ));
        Self {
            tokens: TokenLedger::new(store.clone()),
            store,
            sessions,
            notifier,
            storer,
            limiter,
            config: Arc::new(config),
        }
    }
}

/// Build the application router.
///
/// Layers run outside-in: request id, tracing and panic recovery, rate limiting,
/// identity resolution, CSRF checks, then the per-route gates.
#[must_use]
pub fn router(state: AppState) -> Router {
    with_middleware(routes(), state)
}

fn routes() -> Router {
    let members = Router::new()
        .route("/dashboard", get(dashboard::dashboard))
        .route("/account", get(account::account))
        .route("/account/password", post(account::change_password))
        .route("/account/email/request", post(account::request_email_change))
        .route("/account/email", post(account::change_email))
        .route(
            "/account/profile",
            post(account::update_profile)
                .layer(DefaultBodyLimit::max(account::PROFILE_BODY_LIMIT)),
        )
        .route("/uploads/*name", get(uploads::serve))
        .route_layer(from_fn(verified_only));

    let pages = Router::new()
        .route("/", get(root::root))
        .route("/login", get(login::page).post(login::login))
        .route("/signup", get(signup::page).post(signup::signup))
        .route("/forgot-password", post(password_reset::forgot))
        .route(
            "/reset-password",
            get(password_reset::page).post(password_reset::reset),
        )
        .route("/logout", get(logout::logout))
        .route(
            "/verify-email",
            get(verify_email::page).post(verify_email::verify),
        )
        .route("/verify-email/resend", post(verify_email::resend))
        .merge(members)
        .fallback(root::not_found)
        .layer(from_fn(csrf_protect))
        .layer(from_fn(resolve_identity));

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .merge(pages)
}

fn with_middleware(routes: Router, state: AppState) -> Router {
    routes.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(Extension(state))
            .layer(from_fn(rate_limit)),
    )
}

/// Turn a handler panic into an opaque 500; the payload is only logged.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "panic recovered");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    session_secret: SecretString,
    upload_dir: PathBuf,
    auth_config: AuthConfig,
) -> Result<()> {
    let store = store::connect(&dsn).await?;
    info!(upload_dir = %upload_dir.display(), "Storing uploads on disk");
    let storer = Arc::new(FsStorer::new(upload_dir));

    let sessions = Arc::new(CookieSessionStore::new(
        session_secret,
        auth_config.session_ttl_seconds(),
        auth_config.session_cookie_secure(),
    ));

    let state = AppState::new(store, sessions, Arc::new(LogNotifier), storer, auth_config);
    let sweeper = state.limiter.spawn_sweeper();

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Gracefully shutdown");
        }
    })
    .await?;

    sweeper.abort();

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests;
