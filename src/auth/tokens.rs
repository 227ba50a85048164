//! Single-use, expiring, purpose-scoped tokens.
//!
//! Flow Overview:
//! 1) `issue` stores a random Crockford base32 string with `expires_at = now + ttl`.
//! 2) The raw value is mailed to the user; nothing else ever returns it.
//! 3) `redeem` looks up the newest unexpired token for (owner, email, purpose),
//!    compares the presented value, then claims the row with a conditional delete.
//!    Only the request whose delete removed the row succeeds.
//! 4) After a successful claim, older siblings for the same scope are deleted too.
//!
//! Callers must not tell `NotFound` and `InvalidToken` apart in user-facing
//! messages.

use anyhow::Context;
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error, instrument, warn};

use crate::store::{NewToken, RecordStore, StoreError, Token, TokenLookup, TokenPurpose};

const TOKEN_BYTES: usize = 12;
const ISSUE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no valid token found")]
    NotFound,
    #[error("token does not match")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    /// Expected, user-facing failures (as opposed to store outages).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::NotFound | Self::InvalidToken)
    }
}

/// Generate a human-friendly token: 96 random bits in Crockford base32
/// (no `I`, `L`, `O` or `U`).
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base32::encode(base32::Alphabet::Crockford, &bytes))
}

#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn RecordStore>,
}

impl TokenLedger {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Issue a new token. Earlier tokens for the same scope stay valid.
    ///
    /// # Errors
    /// `TokenError::Store` if the token cannot be persisted.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        owner: Option<i64>,
        email: &str,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<Token, TokenError> {
        // A collision on 96 random bits is practically impossible, but the unique
        // index would reject it, so retry rather than fail the request.
        for _ in 0..ISSUE_ATTEMPTS {
            let value = generate_token().map_err(StoreError::Backend)?;
            let new_token = NewToken {
                user_id: owner,
                email: email.to_string(),
                token: value,
                purpose,
                expires_at: Utc::now() + ttl,
            };
            match self.store.create_token(new_token).await {
                Ok(token) => {
                    debug!(token_id = token.id, "issued token");
                    return Ok(token);
                }
                Err(StoreError::Conflict) => {
                    warn!("token collision, regenerating");
                }
                Err(err) => {
                    error!("Failed to create {purpose} token: {err}");
                    return Err(err.into());
                }
            }
        }

        Err(TokenError::Store(StoreError::Conflict))
    }

    /// Redeem a token exactly once.
    ///
    /// # Errors
    /// - `TokenError::NotFound` when no unexpired token exists for the scope, or a
    ///   concurrent redemption claimed it first.
    /// - `TokenError::InvalidToken` when the presented value differs; the stored
    ///   token stays redeemable.
    /// - `TokenError::Store` when the lookup fails.
    #[instrument(skip(self, presented))]
    pub async fn redeem(
        &self,
        owner: Option<i64>,
        email: &str,
        purpose: TokenPurpose,
        presented: &str,
    ) -> Result<(), TokenError> {
        let lookup = TokenLookup {
            owner,
            email: email.to_string(),
            purpose,
        };

        let token = match self.store.find_latest_valid_token(&lookup, Utc::now()).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("no valid {purpose} token");
                return Err(TokenError::NotFound);
            }
            Err(err) => {
                error!("Failed to look up {purpose} token: {err}");
                return Err(err.into());
            }
        };

        if !bool::from(token.token.as_bytes().ct_eq(presented.as_bytes())) {
            debug!(token_id = token.id, "token mismatch");
            return Err(TokenError::InvalidToken);
        }

        match self.store.delete_token(token.id).await {
            Ok(true) => {}
            Ok(false) => {
                // Someone else redeemed it between our lookup and delete.
                debug!(token_id = token.id, "token already claimed");
                return Err(TokenError::NotFound);
            }
            Err(err) => {
                // Access is granted regardless; a leaked copy stays usable until expiry.
                error!(token_id = token.id, "Failed to delete redeemed token: {err}");
            }
        }

        match self.store.delete_tokens(&lookup).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "revoked sibling tokens"),
            Err(err) => error!("Failed to revoke sibling {purpose} tokens: {err}"),
        }

        Ok(())
    }
}
