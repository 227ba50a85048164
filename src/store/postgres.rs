//! PostgreSQL record store.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument, Span};

use super::{NewToken, NewUser, RecordStore, StoreError, Token, TokenLookup, User, UserUpdate};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str =
    "id, email, password_hash, email_verified, name, picture, role, created_at, updated_at";
const TOKEN_COLUMNS: &str = "id, user_id, email, token, purpose, expires_at, created_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and apply the bundled schema.
    ///
    /// # Errors
    /// Returns an error if the connection or schema setup fails.
    pub async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply `sql/schema.sql`; every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(db_span("MIGRATE", "schema.sql"))
            .await
            .context("Failed to apply database schema")?;
        Ok(())
    }
}

fn db_span(operation: &str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        name: row.get("name"),
        picture: row.get("picture"),
        role: row.get("role"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn token_from_row(row: &PgRow) -> Result<Token, StoreError> {
    let purpose: String = row.get("purpose");
    Ok(Token {
        id: row.get("id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        token: row.get("token"),
        purpose: purpose.parse()?,
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(user_from_row(&row))
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users SET
                email = COALESCE($2, email),
                password_hash = COALESCE($3, password_hash),
                email_verified = COALESCE($4, email_verified),
                name = COALESCE($5, name),
                picture = COALESCE($6, picture),
                updated_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(update.email)
            .bind(update.password_hash)
            .bind(update.email_verified)
            .bind(update.name)
            .bind(update.picture)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_token(&self, token: NewToken) -> Result<Token, StoreError> {
        let query = format!(
            "INSERT INTO tokens (user_id, email, token, purpose, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TOKEN_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(token.user_id)
            .bind(&token.email)
            .bind(&token.token)
            .bind(token.purpose.as_str())
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await?;
        token_from_row(&row)
    }

    async fn find_latest_valid_token(
        &self,
        lookup: &TokenLookup,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE email = $1 AND purpose = $2 AND expires_at > $3 \
               AND ($4::BIGINT IS NULL OR user_id = $4) \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(&lookup.email)
            .bind(lookup.purpose.as_str())
            .bind(now)
            .bind(lookup.owner)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn delete_token(&self, id: i64) -> Result<bool, StoreError> {
        let query = "DELETE FROM tokens WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_tokens(&self, lookup: &TokenLookup) -> Result<u64, StoreError> {
        let query = r"
            DELETE FROM tokens
            WHERE email = $1 AND purpose = $2 AND ($3::BIGINT IS NULL OR user_id = $3)
        ";
        let result = sqlx::query(query)
            .bind(&lookup.email)
            .bind(lookup.purpose.as_str())
            .bind(lookup.owner)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(())
    }
}
