// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User directory contract.
//!
//! Users are owned by the directory. Token flows only read them and flip the
//! `activated` flag or the password hash through [`UserDirectory::update`],
//! which is a compare-and-swap on `version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A user record.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string; `None` for accounts created through an external identity provider
    pub password_hash: Option<String>,
    pub activated: bool,
    /// Optimistic-concurrency counter, bumped by every successful update
    pub version: u64,
}

impl User {
    /// A new, not yet activated user.
    pub fn new(username: impl Into<String>, email: impl Into<String>, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            username: username.into(),
            email: email.into(),
            password_hash: Some(password_hash),
            activated: false,
            version: 0,
        }
    }

    /// An activated user vouched for by an external identity provider.
    ///
    /// It has no password, so password login never succeeds for it.
    pub fn external(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            password_hash: None,
            activated: true,
            ..Self::new(username, email, String::new())
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("activated", &self.activated)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Directory failure classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("user not found")]
    NotFound,
    #[error("a user with this {0} already exists")]
    Duplicate(&'static str),
    #[error("user record was modified concurrently")]
    EditConflict,
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Lookup and versioned mutation of user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: Uuid) -> DirectoryResult<User>;

    async fn get_by_email(&self, email: &str) -> DirectoryResult<User>;

    async fn get_by_username(&self, username: &str) -> DirectoryResult<User>;

    /// Insert a new user. Email and username must be unique.
    ///
    /// Returns the stored record (version 1).
    async fn insert(&self, user: &User) -> DirectoryResult<User>;

    /// Write `user` if the stored version still equals `user.version`.
    ///
    /// Returns the stored record with the bumped version, or
    /// [`DirectoryError::EditConflict`] if the record changed or vanished.
    async fn update(&self, user: &User) -> DirectoryResult<User>;

    async fn delete(&self, id: Uuid) -> DirectoryResult<()>;
}
