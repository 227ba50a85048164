use super::*;
use crate::api::handlers::account::MAX_PICTURE_BYTES;
use crate::auth::session::tests::SECRET;
use crate::email::tests::RecordingNotifier;
use crate::store::MemoryStore;
use anyhow::{anyhow, Result};
use axum::{
    body::to_bytes,
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        request::Builder,
        Method, StatusCode,
    },
    response::Response,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const EMAIL: &str = "a@b.com";
const PASSWORD: &str = "Abc12345!";
const BOUNDARY: &str = "warden-test-boundary";

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    uploads: TempDir,
    cookie: Option<String>,
    csrf: Option<String>,
}

fn config() -> AuthConfig {
    AuthConfig::new("http://localhost:8080".to_string()).with_rate_limit(1000.0, 1000, 180)
}

/// Profile form parts: a name and an optional `(file name, bytes)` picture.
fn profile_body(name: &str, picture: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n"
    )
    .into_bytes();
    if let Some((file_name, bytes)) = picture {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"picture\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

impl TestApp {
    fn new(config: AuthConfig) -> Result<Self> {
        Self::with_routes(config, routes())
    }

    fn with_routes(config: AuthConfig, routes: Router) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let uploads = TempDir::new()?;
        let sessions = Arc::new(CookieSessionStore::new(
            SecretString::from(SECRET.to_string()),
            config.session_ttl_seconds(),
            config.session_cookie_secure(),
        ));
        let storer = Arc::new(FsStorer::new(uploads.path()));
        let state = AppState::new(store.clone(), sessions, notifier.clone(), storer, config);
        Ok(Self {
            app: with_middleware(routes, state),
            store,
            notifier,
            uploads,
            cookie: None,
            csrf: None,
        })
    }

    async fn dispatch(&mut self, mut builder: Builder, body: Body) -> Result<Response> {
        if let Some(cookie) = &self.cookie {
            builder = builder.header(COOKIE, cookie.as_str());
        }
        let response = self.app.clone().oneshot(builder.body(body)?).await?;
        if let Some(set_cookie) = response.headers().get(SET_COOKIE) {
            let pair = set_cookie.to_str()?.split(';').next().unwrap_or_default();
            self.cookie = Some(pair.to_string());
        }
        Ok(response)
    }

    async fn send(&mut self, method: Method, uri: &str, form: &[(&str, &str)]) -> Result<Response> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if form.is_empty() {
            Body::empty()
        } else {
            builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(form)
                .finish();
            Body::from(encoded)
        };
        self.dispatch(builder, body).await
    }

    async fn get(&mut self, uri: &str) -> Result<Response> {
        self.send(Method::GET, uri, &[]).await
    }

    /// The form token, read from the login page the first time it is needed.
    async fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf {
            return Ok(token.clone());
        }
        let page = json(self.get("/login").await?).await?;
        let token = page["csrf"]
            .as_str()
            .ok_or_else(|| anyhow!("login page carries no csrf token"))?
            .to_string();
        self.csrf = Some(token.clone());
        Ok(token)
    }

    /// Submit a form the way a browser would, token included.
    async fn post(&mut self, uri: &str, form: &[(&str, &str)]) -> Result<Response> {
        let token = self.csrf_token().await?;
        let mut fields = form.to_vec();
        fields.push(("csrf", token.as_str()));
        self.send(Method::POST, uri, &fields).await
    }

    async fn upload_profile(&mut self, name: &str, picture: Option<(&str, &[u8])>) -> Result<Response> {
        let token = self.csrf_token().await?;
        let builder = Request::builder()
            .method(Method::POST)
            .uri("/account/profile")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .header("x-csrf-token", token);
        self.dispatch(builder, Body::from(profile_body(name, picture))).await
    }

    /// Drop the browser's cookies.
    fn forget_session(&mut self) {
        self.cookie = None;
        self.csrf = None;
    }

    async fn signup(&mut self) -> Result<Response> {
        self.post(
            "/signup",
            &[
                ("email", EMAIL),
                ("password", PASSWORD),
                ("confirmPassword", PASSWORD),
            ],
        )
        .await
    }

    /// Token carried by the most recent email.
    fn last_token(&self) -> Result<String> {
        let sent = self.notifier.sent.lock();
        let message = sent.last().ok_or_else(|| anyhow!("no email sent"))?;
        message
            .body
            .split_whitespace()
            .find(|word| {
                word.len() == 20
                    && word
                        .chars()
                        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
            })
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("no token in email"))
    }
}

fn location(response: &Response) -> Option<&str> {
    response.headers().get(LOCATION).and_then(|v| v.to_str().ok())
}

async fn json(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let response = app.get("/health").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));
    let body = json(response).await?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn root_redirects_to_dashboard() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let response = app.get("/").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/dashboard"));
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_not_found() -> Result<()> {
    let mut app = TestApp::new(config())?;
    assert_eq!(app.get("/nope").await?.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn anonymous_dashboard_redirects_to_login() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let response = app.get("/dashboard").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn forged_session_is_a_server_error() -> Result<()> {
    let mut app = TestApp::new(config())?;
    app.cookie = Some("warden_session=forged.value".to_string());
    assert_eq!(
        app.get("/dashboard").await?.status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    Ok(())
}

#[tokio::test]
async fn signup_verify_then_dashboard() -> Result<()> {
    let mut app = TestApp::new(config())?;

    let response = app.signup().await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/dashboard"));
    assert!(app.cookie.is_some());

    let response = app.get("/dashboard").await?;
    assert_eq!(location(&response), Some("/verify-email"));

    let page = app.get("/verify-email").await?;
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(json(page).await?["user"]["email"], EMAIL);

    let token = app.last_token()?;
    let response = app.post("/verify-email", &[("token", &token)]).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/dashboard"));

    let dashboard = app.get("/dashboard").await?;
    assert_eq!(dashboard.status(), StatusCode::OK);
    let body = json(dashboard).await?;
    assert_eq!(body["user"]["email_verified"], true);
    assert_eq!(body["flashes"][0]["message"], "Your email has been verified");
    assert!(body["user"].get("password_hash").is_none());

    // Flashes are shown once.
    let again = json(app.get("/dashboard").await?).await?;
    assert_eq!(again["flashes"].as_array().map(Vec::len), Some(0));

    // Verified users are sent away from guest pages.
    assert_eq!(location(&app.get("/verify-email").await?), Some("/dashboard"));
    assert_eq!(location(&app.get("/login").await?), Some("/dashboard"));
    Ok(())
}

#[tokio::test]
async fn wrong_verification_token_is_rejected() -> Result<()> {
    let mut app = TestApp::new(config())?;
    app.signup().await?;

    let response = app.post("/verify-email", &[("token", "WRONGTOKEN")]).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await?["errors"]["token"], "invalid or expired token");

    let response = app.post("/verify-email", &[("token", "bad!")]).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn resend_issues_fresh_token() -> Result<()> {
    let mut app = TestApp::new(config())?;
    app.signup().await?;
    let first = app.last_token()?;

    let response = app.post("/verify-email/resend", &[]).await?;
    assert_eq!(location(&response), Some("/verify-email"));
    let second = app.last_token()?;
    assert_ne!(first, second);

    // Only the newest code counts.
    let stale = app.post("/verify-email", &[("token", &first)]).await?;
    assert_eq!(stale.status(), StatusCode::BAD_REQUEST);
    let fresh = app.post("/verify-email", &[("token", &second)]).await?;
    assert_eq!(location(&fresh), Some("/dashboard"));
    Ok(())
}

#[tokio::test]
async fn signup_validation_and_duplicates() -> Result<()> {
    let mut app = TestApp::new(config())?;

    let response = app
        .post(
            "/signup",
            &[
                ("email", "not-an-email"),
                ("password", "weak"),
                ("confirmPassword", "other"),
            ],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await?;
    assert_eq!(body["errors"]["email"], "invalid email format");
    assert!(body["errors"]["password"].is_string());
    assert_eq!(body["errors"]["confirmPassword"], "passwords do not match");

    app.signup().await?;
    app.forget_session();
    let duplicate = app.signup().await?;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn login_and_logout() -> Result<()> {
    let mut app = TestApp::new(config())?;
    app.signup().await?;
    app.get("/logout").await?;
    assert_eq!(location(&app.get("/dashboard").await?), Some("/login"));

    let wrong = app
        .post("/login", &[("email", EMAIL), ("password", "Wrong123!")])
        .await?;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(wrong).await?["errors"]["form"], "invalid email or password");

    let unknown = app
        .post("/login", &[("email", "x@y.com"), ("password", PASSWORD)])
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post("/login", &[("email", EMAIL), ("password", PASSWORD)])
        .await?;
    assert_eq!(location(&response), Some("/dashboard"));
    // Signed in but not verified yet.
    assert_eq!(location(&app.get("/login").await?), Some("/verify-email"));

    let response = app.get("/logout").await?;
    assert_eq!(location(&response), Some("/login"));
    assert_eq!(location(&app.get("/dashboard").await?), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn password_reset_flow() -> Result<()> {
    let mut app = TestApp::new(config())?;
    app.signup().await?;
    app.get("/logout").await?;

    let response = app.post("/forgot-password", &[("email", EMAIL)]).await?;
    assert_eq!(location(&response), Some("/reset-password?email=a%40b.com"));
    let token = app.last_token()?;

    let page = app.get("/reset-password?email=a%40b.com").await?;
    assert_eq!(json(page).await?["values"]["email"], EMAIL);

    let new_password = "Xyz98765?";
    let form = [
        ("email", EMAIL),
        ("token", token.as_str()),
        ("newPassword", new_password),
        ("confirmPassword", new_password),
    ];
    let response = app.post("/reset-password", &form).await?;
    assert_eq!(location(&response), Some("/login"));

    let login_page = json(app.get("/login").await?).await?;
    assert_eq!(login_page["flashes"][0]["level"], "success");

    // Single use.
    let replay = app.post("/reset-password", &form).await?;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);

    let old = app
        .post("/login", &[("email", EMAIL), ("password", PASSWORD)])
        .await?;
    assert_eq!(old.status(), StatusCode::BAD_REQUEST);
    let new = app
        .post("/login", &[("email", EMAIL), ("password", new_password)])
        .await?;
    assert_eq!(location(&new), Some("/dashboard"));
    Ok(())
}

#[tokio::test]
async fn forgot_password_does_not_reveal_accounts() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let response = app
        .post("/forgot-password", &[("email", "ghost@b.com")])
        .await?;
    assert_eq!(location(&response), Some("/reset-password?email=ghost%40b.com"));
    assert!(app.notifier.sent.lock().is_empty());
    assert_eq!(app.store.token_count(), 0);
    Ok(())
}

async fn verified_app() -> Result<TestApp> {
    let mut app = TestApp::new(config())?;
    app.signup().await?;
    let token = app.last_token()?;
    app.post("/verify-email", &[("token", &token)]).await?;
    Ok(app)
}

#[tokio::test]
async fn account_changes() -> Result<()> {
    let mut app = verified_app().await?;

    let response = app
        .upload_profile("Ada", Some(("ada.png", b"\x89PNG".as_slice())))
        .await?;
    assert_eq!(location(&response), Some("/account"));
    let account = json(app.get("/account").await?).await?;
    assert_eq!(account["user"]["name"], "Ada");
    assert_eq!(account["flashes"][0]["message"], "Your profile has been updated");

    let wrong = app
        .post(
            "/account/password",
            &[
                ("currentPassword", "Wrong123!"),
                ("newPassword", "New12345!"),
                ("confirmPassword", "New12345!"),
            ],
        )
        .await?;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

    let changed = app
        .post(
            "/account/password",
            &[
                ("currentPassword", PASSWORD),
                ("newPassword", "New12345!"),
                ("confirmPassword", "New12345!"),
            ],
        )
        .await?;
    assert_eq!(location(&changed), Some("/account"));

    let requested = app
        .post("/account/email/request", &[("email", "new@b.com")])
        .await?;
    assert_eq!(location(&requested), Some("/account"));
    let token = app.last_token()?;
    assert_eq!(
        app.notifier.sent.lock().last().map(|m| m.to.clone()),
        Some("new@b.com".to_string())
    );

    let mismatch = app
        .post("/account/email", &[("email", "other@b.com"), ("token", &token)])
        .await?;
    assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);

    let switched = app
        .post("/account/email", &[("email", "new@b.com"), ("token", &token)])
        .await?;
    assert_eq!(location(&switched), Some("/account"));
    let account = json(app.get("/account").await?).await?;
    assert_eq!(account["user"]["email"], "new@b.com");
    Ok(())
}

#[tokio::test]
async fn unverified_users_cannot_reach_account() -> Result<()> {
    let mut app = TestApp::new(config())?;
    app.signup().await?;
    let response = app
        .upload_profile("Ada", Some(("ada.png", b"\x89PNG".as_slice())))
        .await?;
    assert_eq!(location(&response), Some("/verify-email"));
    assert_eq!(
        location(&app.get("/uploads/profile/a.png").await?),
        Some("/verify-email")
    );

    app.forget_session();
    assert_eq!(location(&app.get("/uploads/profile/a.png").await?), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn deleted_user_session_is_anonymous() -> Result<()> {
    let mut app = verified_app().await?;
    assert!(app.store.remove_user(1));
    assert_eq!(location(&app.get("/dashboard").await?), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn rate_limit_rejects_bursts() -> Result<()> {
    let config = AuthConfig::new("http://localhost:8080".to_string()).with_rate_limit(0.001, 2, 180);
    let mut app = TestApp::new(config)?;
    assert_eq!(app.get("/login").await?.status(), StatusCode::OK);
    assert_eq!(app.get("/login").await?.status(), StatusCode::OK);
    assert_eq!(
        app.get("/login").await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // Another forwarded client still has its own bucket.
    let request = Request::builder()
        .uri("/login")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())?;
    let response = app.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn posts_without_csrf_token_are_forbidden() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let form = [("email", EMAIL), ("password", PASSWORD)];

    // No session at all.
    let response = app.send(Method::POST, "/login", &form).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A session with a token, but the form leaves it out.
    app.csrf_token().await?;
    let response = app.send(Method::POST, "/login", &form).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.send(Method::POST, "/verify-email/resend", &[]).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn posts_with_wrong_csrf_token_are_forbidden() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let token = app.csrf_token().await?;
    let signup = [
        ("email", EMAIL),
        ("password", PASSWORD),
        ("confirmPassword", PASSWORD),
    ];

    let mut forged = signup.to_vec();
    forged.push(("csrf", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));
    let response = app.send(Method::POST, "/signup", &forged).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let builder = Request::builder()
        .method(Method::POST)
        .uri("/signup")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("x-csrf-token", "not-the-token");
    let response = app.dispatch(builder, Body::from("email=a%40b.com")).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.store.user_count(), 0);

    // The header alone is enough when it matches.
    let builder = Request::builder()
        .method(Method::POST)
        .uri("/signup")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("x-csrf-token", token);
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(signup)
        .finish();
    let response = app.dispatch(builder, Body::from(encoded)).await?;
    assert_eq!(location(&response), Some("/dashboard"));
    Ok(())
}

#[tokio::test]
async fn csrf_token_survives_login_and_logout() -> Result<()> {
    let mut app = TestApp::new(config())?;
    let token = app.csrf_token().await?;

    app.signup().await?;
    let page = json(app.get("/verify-email").await?).await?;
    assert_eq!(page["csrf"], token.as_str());

    app.get("/logout").await?;
    let page = json(app.get("/login").await?).await?;
    assert_eq!(page["csrf"], token.as_str());

    // Re-rendered forms carry it too.
    let failed = app
        .post("/login", &[("email", EMAIL), ("password", "Wrong123!")])
        .await?;
    assert_eq!(failed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(failed).await?["csrf"], token.as_str());
    Ok(())
}

#[tokio::test]
async fn profile_picture_upload_and_serving() -> Result<()> {
    let mut app = verified_app().await?;
    let png = b"\x89PNG\r\n\x1a\nfirst";

    let response = app.upload_profile(" Ada ", Some(("Me.PNG", png.as_slice()))).await?;
    assert_eq!(location(&response), Some("/account"));
    let account = json(app.get("/account").await?).await?;
    assert_eq!(account["user"]["name"], "Ada");
    let first = account["user"]["picture"]
        .as_str()
        .ok_or_else(|| anyhow!("no picture"))?
        .to_string();
    assert!(first.starts_with("/uploads/profile/"), "{first}");
    assert!(first.ends_with(".png"), "{first}");

    let served = app.get(&first).await?;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(
        served.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(
        served.headers().get("x-content-type-options").and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    let bytes = to_bytes(served.into_body(), usize::MAX).await?;
    assert_eq!(bytes.as_ref(), png.as_slice());

    // A new picture replaces the old file.
    app.upload_profile("Ada", Some(("me.jpg", b"jpeg".as_slice()))).await?;
    let account = json(app.get("/account").await?).await?;
    let second = account["user"]["picture"].as_str().unwrap_or_default().to_string();
    assert!(second.ends_with(".jpg"), "{second}");
    assert_eq!(app.get(&first).await?.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get(&second).await?.status(), StatusCode::OK);

    let stored = second.trim_start_matches("/uploads/");
    assert!(app.uploads.path().join(stored).is_file());
    Ok(())
}

#[tokio::test]
async fn oversized_picture_is_rejected() -> Result<()> {
    let mut app = verified_app().await?;

    let just_over = vec![0u8; MAX_PICTURE_BYTES + 1];
    let response = app.upload_profile("Ada", Some(("big.png", just_over.as_slice()))).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let page = json(response).await?;
    assert_eq!(page["errors"]["picture"], "picture size exceeds 5MB limit");
    assert!(page["user"]["picture"].is_null());

    // Past the request body cap the multipart reader itself gives up.
    let far_over = vec![0u8; MAX_PICTURE_BYTES * 2];
    let response = app.upload_profile("Ada", Some(("big.png", far_over.as_slice()))).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json(response).await?["errors"]["picture"],
        "picture size exceeds 5MB limit"
    );

    let account = json(app.get("/account").await?).await?;
    assert!(account["user"]["picture"].is_null());
    assert!(!app.uploads.path().join("profile").exists());
    Ok(())
}

#[tokio::test]
async fn profile_needs_a_name_and_a_picture() -> Result<()> {
    let mut app = verified_app().await?;

    let response = app.upload_profile("Ada", None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await?["errors"]["picture"], "picture is required");

    let response = app
        .upload_profile("  ", Some(("a.png", b"png".as_slice())))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await?["errors"]["name"], "name is required");

    // Multipart forms are checked through the header.
    let builder = Request::builder()
        .method(Method::POST)
        .uri("/account/profile")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    let body = profile_body("Ada", Some(("a.png", b"png".as_slice())));
    let response = app.dispatch(builder, Body::from(body)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn upload_paths_cannot_escape_the_directory() -> Result<()> {
    let mut app = verified_app().await?;
    app.upload_profile("Ada", Some(("a.png", b"png".as_slice()))).await?;

    for path in [
        "/uploads/..%2Fwarden-secret.txt",
        "/uploads/profile/..%2F..%2Fwarden-secret.txt",
        "/uploads/profile/missing.png",
    ] {
        assert_eq!(app.get(path).await?.status(), StatusCode::NOT_FOUND, "{path}");
    }
    Ok(())
}

async fn boom() -> &'static str {
    panic!("handler bug")
}

#[tokio::test]
async fn handler_panics_become_server_errors() -> Result<()> {
    let mut app = TestApp::with_routes(config(), routes().route("/boom", get(boom)))?;
    let response = app.get("/boom").await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key("x-request-id"));
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(body.as_ref(), b"Internal Server Error");

    // The server keeps answering.
    assert_eq!(app.get("/health").await?.status(), StatusCode::OK);
    Ok(())
}
