//! Cookie-held sessions.
//!
//! The whole session bag travels in one cookie:
//!
//! ```text
//! warden_session=<base64url(json payload)>.<base64url(hmac-sha256(payload))>
//! ```
//!
//! The payload carries the issued-at time and the key/value bag. A cookie whose
//! signature does not verify, or whose payload does not decode, is an error; an
//! absent or expired cookie is simply an empty bag.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fmt;

pub const SESSION_COOKIE_NAME: &str = "warden_session";
pub const USER_ID_KEY: &str = "user_id";
const FLASH_KEY: &str = "_flash";
pub const CSRF_KEY: &str = "_csrf";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session signature mismatch")]
    BadSignature,
    #[error("malformed session cookie: {0}")]
    Malformed(String),
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid session key")]
    Key,
    #[error("invalid Set-Cookie value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

/// Key/value state attached to one browser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionBag {
    values: Map<String, Value>,
}

impl SessionBag {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The logged-in user, if any. Non-numeric values count as absent.
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.values.get(USER_ID_KEY).and_then(Value::as_i64)
    }

    pub fn set_user_id(&mut self, user_id: i64) {
        self.insert(USER_ID_KEY, Value::from(user_id));
    }

    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.values
            .get(CSRF_KEY)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
    }

    pub fn set_csrf_token(&mut self, token: impl Into<String>) {
        self.insert(CSRF_KEY, Value::from(token.into()));
    }

    pub fn push_flash(&mut self, level: FlashLevel, message: impl Into<String>) {
        let flash = Flash {
            level,
            message: message.into(),
        };
        let Ok(flash) = serde_json::to_value(flash) else {
            return;
        };
        let entry = self
            .values
            .entry(FLASH_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(flash),
            other => *other = Value::Array(vec![flash]),
        }
    }

    /// Drain pending flash messages; entries that do not decode are dropped.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        match self.values.remove(FLASH_KEY) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One-shot message shown on the next rendered page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

/// Loads and persists session bags from request/response headers.
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// `SessionError` when a session cookie is present but cannot be trusted.
    fn load(&self, headers: &HeaderMap) -> Result<SessionBag, SessionError>;

    fn new_empty(&self) -> SessionBag {
        SessionBag::default()
    }

    /// Serialize `bag` into a `Set-Cookie` header value.
    ///
    /// # Errors
    /// `SessionError` if the bag cannot be encoded.
    fn save(&self, bag: &SessionBag) -> Result<HeaderValue, SessionError>;
}

#[derive(Serialize, Deserialize)]
struct Payload {
    iat: i64,
    values: Map<String, Value>,
}

pub struct CookieSessionStore {
    secret: SecretString,
    ttl_seconds: i64,
    secure: bool,
}

impl fmt::Debug for CookieSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieSessionStore")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl CookieSessionStore {
    #[must_use]
    pub fn new(secret: SecretString, ttl_seconds: i64, secure: bool) -> Self {
        Self {
            secret,
            ttl_seconds,
            secure,
        }
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SessionError::Key)
    }

    fn sign(&self, payload: &str) -> Result<String, SessionError> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes()))
    }

    fn verify(&self, payload: &str, signature: &str) -> Result<(), SessionError> {
        let signature = Base64UrlUnpadded::decode_vec(signature)
            .map_err(|err| SessionError::Malformed(format!("signature: {err}")))?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)
    }
}

impl SessionStore for CookieSessionStore {
    fn load(&self, headers: &HeaderMap) -> Result<SessionBag, SessionError> {
        let Some(cookie) = extract_session_cookie(headers) else {
            return Ok(SessionBag::default());
        };

        let (payload, signature) = cookie
            .split_once('.')
            .ok_or_else(|| SessionError::Malformed("missing signature".to_string()))?;
        self.verify(payload, signature)?;

        let json = Base64UrlUnpadded::decode_vec(payload)
            .map_err(|err| SessionError::Malformed(format!("payload: {err}")))?;
        let payload: Payload = serde_json::from_slice(&json)
            .map_err(|err| SessionError::Malformed(format!("payload: {err}")))?;

        if Utc::now().timestamp() >= payload.iat.saturating_add(self.ttl_seconds) {
            return Ok(SessionBag::default());
        }

        Ok(SessionBag {
            values: payload.values,
        })
    }

    fn save(&self, bag: &SessionBag) -> Result<HeaderValue, SessionError> {
        let payload = Payload {
            iat: Utc::now().timestamp(),
            values: bag.values.clone(),
        };
        let encoded = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&payload)?);
        let signature = self.sign(&encoded)?;
        let max_age = self.ttl_seconds.max(0);

        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={encoded}.{signature}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        Ok(HeaderValue::from_str(&cookie)?)
    }
}

fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

/// Start a fresh session for `user_id`, dropping whatever the browser had except
/// its CSRF token.
///
/// # Errors
/// `SessionError` if the current session is unreadable or cannot be saved.
pub fn log_in(
    store: &dyn SessionStore,
    headers: &HeaderMap,
    user_id: i64,
) -> Result<HeaderValue, SessionError> {
    let previous = store.load(headers)?;
    let mut bag = store.new_empty();
    if let Some(token) = previous.csrf_token() {
        bag.set_csrf_token(token);
    }
    bag.set_user_id(user_id);
    store.save(&bag)
}

/// Clear every value in the current session but the CSRF token, flashes included.
///
/// # Errors
/// `SessionError` if the current session is unreadable or cannot be saved.
pub fn log_out(store: &dyn SessionStore, headers: &HeaderMap) -> Result<HeaderValue, SessionError> {
    let mut bag = store.load(headers)?;
    let token = bag.csrf_token().map(ToString::to_string);
    bag.clear();
    if let Some(token) = token {
        bag.set_csrf_token(token);
    }
    store.save(&bag)
}
