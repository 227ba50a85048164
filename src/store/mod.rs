//! Record store abstraction for users and single-use tokens.
//!
//! Handlers and the auth core only talk to [`RecordStore`]; the backing engine is
//! chosen at startup from the DSN scheme:
//!
//! - `postgres://…` → [`PgStore`] (sqlx, schema in `sql/schema.sql`)
//! - `memory://` → [`MemoryStore`] (process-local, used by tests and local dev)
//!
//! Durability and isolation are the engine's concern. The only atomicity this
//! crate relies on is [`RecordStore::delete_token`] reporting whether *this* call
//! removed the row, which token redemption uses as its claim.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::info;
use url::Url;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Open the record store named by `dsn`.
///
/// # Errors
/// Returns an error for unsupported schemes or when the database is unreachable.
pub async fn connect(dsn: &str) -> anyhow::Result<Arc<dyn RecordStore>> {
    let parsed = Url::parse(dsn).context("Invalid DSN")?;
    match parsed.scheme() {
        "memory" => {
            info!("Using in-memory record store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" | "postgresql" => {
            let store = PgStore::connect(dsn).await?;
            info!("Connected to PostgreSQL record store");
            Ok(Arc::new(store))
        }
        other => Err(anyhow!("Unsupported DSN scheme: {other}")),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint (user email, token string) was violated.
    #[error("record already exists")]
    Conflict,
    #[error("record store failure: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            Self::Conflict
        } else {
            Self::Backend(err.into())
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_verified: bool,
    pub name: Option<String>,
    /// Public path of the profile picture, under `/uploads/`.
    pub picture: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a user at signup.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Clone, Debug, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl UserUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.password_hash.is_none()
            && self.email_verified.is_none()
            && self.name.is_none()
            && self.picture.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
    EmailChange,
}

impl TokenPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
            Self::EmailChange => "email_change",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenPurpose {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "email_verification" => Ok(Self::EmailVerification),
            "password_reset" => Ok(Self::PasswordReset),
            "email_change" => Ok(Self::EmailChange),
            other => Err(StoreError::Backend(anyhow::anyhow!(
                "unknown token purpose: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub id: i64,
    pub user_id: Option<i64>,
    pub email: String,
    pub token: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Token {
    // Never print the token value itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{} ({}, {})", self.id, self.purpose, self.email)
    }
}

#[derive(Clone, Debug)]
pub struct NewToken {
    pub user_id: Option<i64>,
    pub email: String,
    pub token: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

/// Selects the tokens a redemption may consider.
///
/// `email` and `purpose` always have to match; `owner` narrows further when the
/// token was issued to a known user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLookup {
    pub owner: Option<i64>,
    pub email: String,
    pub purpose: TokenPurpose,
}

impl TokenLookup {
    #[must_use]
    pub fn matches(&self, token: &Token) -> bool {
        token.email == self.email
            && token.purpose == self.purpose
            && self.owner.is_none_or(|owner| token.user_id == Some(owner))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new, unverified user.
    ///
    /// # Errors
    /// `StoreError::Conflict` if the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Apply a partial update, returning `false` when the user does not exist.
    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<bool, StoreError>;

    async fn create_token(&self, token: NewToken) -> Result<Token, StoreError>;

    /// Newest token for `lookup` with `expires_at > now`.
    async fn find_latest_valid_token(
        &self,
        lookup: &TokenLookup,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError>;

    /// Delete one token, returning `true` only if this call removed it.
    async fn delete_token(&self, id: i64) -> Result<bool, StoreError>;

    /// Delete every token matching `lookup`, expired or not.
    async fn delete_tokens(&self, lookup: &TokenLookup) -> Result<u64, StoreError>;

    /// Cheap liveness check used by `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}
