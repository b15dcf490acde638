// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Embedded Storage
//!
//! Token and user records live in a single redb database file (pure Rust,
//! ACID). Every call runs on the blocking pool and is bounded by the configured
//! store timeout; a call that does not finish in time surfaces as
//! "unavailable" rather than hanging the request.
//!
//! ## Table Layout
//!
//! - `activation_tokens`: sha256(plaintext) → JSON { user_id, passcode, expires_at }
//! - `reset_tokens`: sha256(plaintext) → JSON { user_id, expires_at }
//! - `refresh_tokens`: signed token → JSON { user_id, issued_at, expires_at }
//! - `users`: user_id → JSON user record
//! - `users_by_email`: lowercase email → user_id
//! - `users_by_username`: username → user_id
//! - `activation_tokens_by_user`, `reset_tokens_by_user`: user_id ‖ hash → ()
//! - `refresh_tokens_by_user`: user_id ‖ token → ()
//!
//! The `*_by_user` tables are written in the same transaction as the table
//! they index, so per-user deletes are a prefix range scan.
//!
//! redb serializes write transactions within the process and holds an
//! exclusive lock on the file, so one service instance owns a database.
//! Uniqueness checks run inside write transactions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, TableDefinition};

use crate::directory::DirectoryError;
use crate::tokens::store::StoreError;

pub mod tokens;
pub mod users;

pub use tokens::RedbTokenStore;
pub use users::RedbUserDirectory;

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const ACTIVATION_TOKENS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("activation_tokens");

pub(crate) const RESET_TOKENS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("reset_tokens");

pub(crate) const REFRESH_TOKENS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("refresh_tokens");

pub(crate) const ACTIVATION_BY_USER: TableDefinition<&[u8], ()> =
    TableDefinition::new("activation_tokens_by_user");

pub(crate) const RESET_BY_USER: TableDefinition<&[u8], ()> =
    TableDefinition::new("reset_tokens_by_user");

pub(crate) const REFRESH_BY_USER: TableDefinition<&[u8], ()> =
    TableDefinition::new("refresh_tokens_by_user");

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

pub(crate) const USERS_BY_EMAIL: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");

pub(crate) const USERS_BY_USERNAME: TableDefinition<&str, &str> =
    TableDefinition::new("users_by_username");

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "auth.redb";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found")]
    NotFound,

    #[error("per-user index key is not valid")]
    CorruptIndex,

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("version mismatch")]
    VersionMismatch,

    #[error("store call exceeded {0:?}")]
    Timeout(Duration),

    #[error("blocking store task failed: {0}")]
    Join(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => StoreError::NotFound,
            DbError::Duplicate(_) => StoreError::Conflict,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<DbError> for DirectoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => DirectoryError::NotFound,
            DbError::Duplicate(field) => DirectoryError::Duplicate(field),
            DbError::VersionMismatch => DirectoryError::EditConflict,
            other => DirectoryError::Unavailable(other.to_string()),
        }
    }
}

// =============================================================================
// AuthDatabase
// =============================================================================

/// Shared handle to the embedded database plus the per-call timeout.
#[derive(Clone)]
pub struct AuthDatabase {
    db: Arc<Database>,
    timeout: Duration,
}

impl AuthDatabase {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, timeout: Duration) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACTIVATION_TOKENS)?;
            let _ = write_txn.open_table(RESET_TOKENS)?;
            let _ = write_txn.open_table(REFRESH_TOKENS)?;
            let _ = write_txn.open_table(ACTIVATION_BY_USER)?;
            let _ = write_txn.open_table(RESET_BY_USER)?;
            let _ = write_txn.open_table(REFRESH_BY_USER)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERS_BY_EMAIL)?;
            let _ = write_txn.open_table(USERS_BY_USERNAME)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            timeout,
        })
    }

    /// Run `op` on the blocking pool, bounded by the store timeout.
    pub(crate) async fn run<T, F>(&self, op: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let task = tokio::task::spawn_blocking(move || op(&db));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DbError::Join(join_err.to_string())),
            Err(_) => Err(DbError::Timeout(self.timeout)),
        }
    }

    /// Open and close a read transaction.
    pub async fn ping(&self) -> DbResult<()> {
        self.run(|db| {
            let read_txn = db.begin_read()?;
            drop(read_txn);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A fresh database in a temporary directory.
    pub(crate) fn temp_database() -> (AuthDatabase, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = AuthDatabase::open(&dir.path().join(DATABASE_FILE), Duration::from_secs(3))
            .expect("Failed to open database");
        (db, dir)
    }
}
