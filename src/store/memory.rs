//! Process-local record store.
//!
//! Selected with a `memory://` DSN. Everything lives behind one mutex, which
//! also makes `delete_token` a natural atomic claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{NewToken, NewUser, RecordStore, StoreError, Token, TokenLookup, User, UserUpdate};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    tokens: BTreeMap<i64, Token>,
    next_user_id: i64,
    next_token_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, expired ones included.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tables.lock().tokens.len()
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.tables.lock().users.len()
    }

    /// Hard-delete a user; only used to simulate stale sessions.
    pub fn remove_user(&self, id: i64) -> bool {
        self.tables.lock().users.remove(&id).is_some()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict);
        }
        tables.next_user_id += 1;
        let now = Utc::now();
        let record = User {
            id: tables.next_user_id,
            email: user.email,
            password_hash: user.password_hash,
            email_verified: false,
            name: None,
            picture: None,
            role: "basic".to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        if let Some(email) = &update.email {
            if tables.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Conflict);
            }
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(hash) = update.password_hash {
            user.password_hash = hash;
        }
        if let Some(verified) = update.email_verified {
            user.email_verified = verified;
        }
        if let Some(name) = update.name {
            user.name = Some(name);
        }
        if let Some(picture) = update.picture {
            user.picture = Some(picture);
        }
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn create_token(&self, token: NewToken) -> Result<Token, StoreError> {
        let mut tables = self.tables.lock();
        if tables.tokens.values().any(|t| t.token == token.token) {
            return Err(StoreError::Conflict);
        }
        tables.next_token_id += 1;
        let record = Token {
            id: tables.next_token_id,
            user_id: token.user_id,
            email: token.email,
            token: token.token,
            purpose: token.purpose,
            expires_at: token.expires_at,
            created_at: Utc::now(),
        };
        tables.tokens.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_latest_valid_token(
        &self,
        lookup: &TokenLookup,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        Ok(self
            .tables
            .lock()
            .tokens
            .values()
            .filter(|t| lookup.matches(t) && t.expires_at > now)
            .max_by_key(|t| (t.created_at, t.id))
            .cloned())
    }

    async fn delete_token(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables.lock().tokens.remove(&id).is_some())
    }

    async fn delete_tokens(&self, lookup: &TokenLookup) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| !lookup.matches(t));
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
