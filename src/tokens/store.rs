// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token persistence contract.
//!
//! One-time secrets are keyed by the SHA-256 digest of their plaintext, in one
//! table per [`SecretPurpose`]. Refresh credentials are keyed by their signed
//! value. Implementations classify failures themselves: a duplicate key is
//! [`StoreError::Conflict`], a missing or expired record is
//! [`StoreError::NotFound`], and anything infrastructural (including a call
//! that exceeds its timeout) is [`StoreError::Unavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::secret::SecretHash;

/// What a one-time secret proves possession of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretPurpose {
    Activation,
    PasswordReset,
}

impl std::fmt::Display for SecretPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretPurpose::Activation => write!(f, "activation"),
            SecretPurpose::PasswordReset => write!(f, "password_reset"),
        }
    }
}

/// A one-time activation or reset secret.
///
/// `plaintext` is only meaningful on the issuing side and on lookup results
/// (where it echoes the caller's input); it is never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimeSecret {
    pub plaintext: String,
    pub hash: SecretHash,
    pub user_id: Uuid,
    pub passcode: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub purpose: SecretPurpose,
}

impl OneTimeSecret {
    /// Whether the secret is still usable at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

impl std::fmt::Debug for OneTimeSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeSecret")
            .field("hash", &super::secret::hex_prefix(&self.hash))
            .field("user_id", &self.user_id)
            .field("has_passcode", &self.passcode.is_some())
            .field("expires_at", &self.expires_at)
            .field("purpose", &self.purpose)
            .finish()
    }
}

/// A persisted refresh credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCredential {
    pub token: String,
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token store failure classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate key")]
    Conflict,
    #[error("token store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of one-time secrets and refresh credentials.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a one-time secret keyed by its hash.
    ///
    /// Fails with [`StoreError::Conflict`] when the hash already exists for the
    /// secret's purpose.
    async fn put_one_time_secret(&self, secret: &OneTimeSecret) -> StoreResult<()>;

    /// Look up an unexpired secret by plaintext. Does not delete it.
    async fn consume_one_time_secret(
        &self,
        plaintext: &str,
        purpose: SecretPurpose,
    ) -> StoreResult<OneTimeSecret>;

    /// Compare `passcode` with the one stored for an unexpired activation secret.
    async fn validate_passcode(&self, plaintext: &str, passcode: &str) -> StoreResult<bool>;

    /// Delete every secret of `purpose` owned by `user_id`.
    async fn delete_one_time_secrets_for_user(
        &self,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> StoreResult<()>;

    /// Insert a refresh credential.
    async fn put_refresh_credential(&self, credential: &RefreshCredential) -> StoreResult<()>;

    /// Owner of an unexpired refresh credential.
    async fn get_refresh_owner(&self, token: &str) -> StoreResult<Uuid>;

    /// Delete one refresh credential.
    async fn delete_refresh_credential(&self, token: &str) -> StoreResult<()>;

    /// Delete every refresh credential owned by `user_id`.
    async fn delete_refresh_credentials_for_user(&self, user_id: Uuid) -> StoreResult<()>;

    /// Atomically replace the owner's refresh credentials with `credential`.
    ///
    /// When `presented` is given it must still exist and belong to the same
    /// owner, otherwise nothing changes and [`StoreError::NotFound`] is
    /// returned. Two concurrent rotations of one credential therefore cannot
    /// both succeed.
    async fn rotate_refresh_credential(
        &self,
        credential: &RefreshCredential,
        presented: Option<&str>,
    ) -> StoreResult<()>;

    /// Cheap reachability check used by readiness.
    async fn ping(&self) -> StoreResult<()>;
}
