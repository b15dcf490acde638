// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! redb-backed [`UserDirectory`].
//!
//! Email lookups are case-insensitive (the index key is lowercased); usernames
//! are matched exactly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AuthDatabase, DbError, USERS, USERS_BY_EMAIL, USERS_BY_USERNAME};
use crate::directory::{DirectoryResult, User, UserDirectory};

#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    id: Uuid,
    created_at: DateTime<Utc>,
    username: String,
    email: String,
    #[serde(default)]
    password_hash: Option<String>,
    activated: bool,
    version: u64,
}

impl From<&User> for StoredUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            activated: user.activated,
            version: user.version,
        }
    }
}

impl From<StoredUser> for User {
    fn from(stored: StoredUser) -> Self {
        Self {
            id: stored.id,
            created_at: stored.created_at,
            username: stored.username,
            email: stored.email,
            password_hash: stored.password_hash,
            activated: stored.activated,
            version: stored.version,
        }
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User directory over the shared [`AuthDatabase`].
#[derive(Clone)]
pub struct RedbUserDirectory {
    db: AuthDatabase,
}

impl RedbUserDirectory {
    pub fn new(db: AuthDatabase) -> Self {
        Self { db }
    }

    async fn get_by_index(
        &self,
        index: TableDefinition<'static, &'static str, &'static str>,
        key: String,
    ) -> DirectoryResult<User> {
        let user = self
            .db
            .run(move |db| {
                let read_txn = db.begin_read()?;
                let index = read_txn.open_table(index)?;
                let id = index
                    .get(key.as_str())?
                    .map(|value| value.value().to_string())
                    .ok_or(DbError::NotFound)?;

                let users = read_txn.open_table(USERS)?;
                let value = users.get(id.as_str())?.ok_or(DbError::NotFound)?;
                let stored: StoredUser = serde_json::from_slice(value.value())?;
                Ok(stored)
            })
            .await?;
        Ok(user.into())
    }
}

#[async_trait]
impl UserDirectory for RedbUserDirectory {
    async fn get(&self, id: Uuid) -> DirectoryResult<User> {
        let user = self
            .db
            .run(move |db| {
                let read_txn = db.begin_read()?;
                let users = read_txn.open_table(USERS)?;
                let value = users
                    .get(id.to_string().as_str())?
                    .ok_or(DbError::NotFound)?;
                let stored: StoredUser = serde_json::from_slice(value.value())?;
                Ok(stored)
            })
            .await?;
        Ok(user.into())
    }

    async fn get_by_email(&self, email: &str) -> DirectoryResult<User> {
        self.get_by_index(USERS_BY_EMAIL, email_key(email)).await
    }

    async fn get_by_username(&self, username: &str) -> DirectoryResult<User> {
        self.get_by_index(USERS_BY_USERNAME, username.to_string())
            .await
    }

    async fn insert(&self, user: &User) -> DirectoryResult<User> {
        let mut stored = StoredUser::from(user);
        stored.version = 1;

        let stored = self
            .db
            .run(move |db| {
                let id = stored.id.to_string();
                let email = email_key(&stored.email);
                let json = serde_json::to_vec(&stored)?;

                let write_txn = db.begin_write()?;
                {
                    let mut by_email = write_txn.open_table(USERS_BY_EMAIL)?;
                    if by_email.get(email.as_str())?.is_some() {
                        return Err(DbError::Duplicate("email"));
                    }
                    let mut by_username = write_txn.open_table(USERS_BY_USERNAME)?;
                    if by_username.get(stored.username.as_str())?.is_some() {
                        return Err(DbError::Duplicate("username"));
                    }
                    let mut users = write_txn.open_table(USERS)?;
                    if users.get(id.as_str())?.is_some() {
                        return Err(DbError::Duplicate("id"));
                    }

                    users.insert(id.as_str(), json.as_slice())?;
                    by_email.insert(email.as_str(), id.as_str())?;
                    by_username.insert(stored.username.as_str(), id.as_str())?;
                }
                write_txn.commit()?;
                Ok(stored)
            })
            .await?;

        tracing::debug!(user_id = %stored.id, "Inserted user");
        Ok(stored.into())
    }

    async fn update(&self, user: &User) -> DirectoryResult<User> {
        let mut next = StoredUser::from(user);
        let expected = user.version;
        next.version = expected + 1;

        let stored = self
            .db
            .run(move |db| {
                let id = next.id.to_string();

                let write_txn = db.begin_write()?;
                {
                    let mut users = write_txn.open_table(USERS)?;
                    let current_bytes = users
                        .get(id.as_str())?
                        .map(|value| value.value().to_vec())
                        .ok_or(DbError::VersionMismatch)?;
                    let current: StoredUser = serde_json::from_slice(&current_bytes)?;
                    if current.version != expected {
                        return Err(DbError::VersionMismatch);
                    }

                    // Keep the secondary indexes in step with renamed fields
                    let old_email = email_key(&current.email);
                    let new_email = email_key(&next.email);
                    if old_email != new_email {
                        let mut by_email = write_txn.open_table(USERS_BY_EMAIL)?;
                        if by_email.get(new_email.as_str())?.is_some() {
                            return Err(DbError::Duplicate("email"));
                        }
                        by_email.remove(old_email.as_str())?;
                        by_email.insert(new_email.as_str(), id.as_str())?;
                    }
                    if current.username != next.username {
                        let mut by_username = write_txn.open_table(USERS_BY_USERNAME)?;
                        if by_username.get(next.username.as_str())?.is_some() {
                            return Err(DbError::Duplicate("username"));
                        }
                        by_username.remove(current.username.as_str())?;
                        by_username.insert(next.username.as_str(), id.as_str())?;
                    }

                    let json = serde_json::to_vec(&next)?;
                    users.insert(id.as_str(), json.as_slice())?;
                }
                write_txn.commit()?;
                Ok(next)
            })
            .await?;

        Ok(stored.into())
    }

    async fn delete(&self, id: Uuid) -> DirectoryResult<()> {
        self.db
            .run(move |db| {
                let id = id.to_string();

                let write_txn = db.begin_write()?;
                {
                    let mut users = write_txn.open_table(USERS)?;
                    let bytes = users
                        .remove(id.as_str())?
                        .map(|value| value.value().to_vec())
                        .ok_or(DbError::NotFound)?;
                    let stored: StoredUser = serde_json::from_slice(&bytes)?;

                    let mut by_email = write_txn.open_table(USERS_BY_EMAIL)?;
                    by_email.remove(email_key(&stored.email).as_str())?;
                    let mut by_username = write_txn.open_table(USERS_BY_USERNAME)?;
                    by_username.remove(stored.username.as_str())?;
                }
                write_txn.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!(user_id = %id, "Deleted user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryError;
    use crate::storage::test_support::temp_database;

    fn directory() -> (RedbUserDirectory, tempfile::TempDir) {
        let (db, dir) = temp_database();
        (RedbUserDirectory::new(db), dir)
    }

    #[tokio::test]
    async fn insert_then_lookup_by_every_key() {
        let (directory, _dir) = directory();
        let user = User::new("alice", "Alice@Example.com", "hash".to_string());

        let stored = directory.insert(&user).await.unwrap();
        assert_eq!(stored.version, 1);

        assert_eq!(directory.get(user.id).await.unwrap(), stored);
        assert_eq!(directory.get_by_email("alice@example.com").await.unwrap(), stored);
        assert_eq!(directory.get_by_username("alice").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn duplicates_are_reported_by_field() {
        let (directory, _dir) = directory();
        directory
            .insert(&User::new("alice", "alice@example.com", "hash".to_string()))
            .await
            .unwrap();

        let same_email = User::new("alice2", "ALICE@example.com", "hash".to_string());
        assert_eq!(
            directory.insert(&same_email).await,
            Err(DirectoryError::Duplicate("email"))
        );

        let same_username = User::new("alice", "other@example.com", "hash".to_string());
        assert_eq!(
            directory.insert(&same_username).await,
            Err(DirectoryError::Duplicate("username"))
        );
    }

    #[tokio::test]
    async fn update_is_compare_and_swap_on_version() {
        let (directory, _dir) = directory();
        let stored = directory
            .insert(&User::new("bob", "bob@example.com", "hash".to_string()))
            .await
            .unwrap();

        let mut first = stored.clone();
        first.activated = true;
        let updated = directory.update(&first).await.unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.activated);

        // A writer still holding version 1 loses
        let mut stale = stored;
        stale.password_hash = Some("other".to_string());
        assert_eq!(
            directory.update(&stale).await,
            Err(DirectoryError::EditConflict)
        );
        assert_eq!(directory.get(updated.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn update_of_a_vanished_user_is_a_conflict() {
        let (directory, _dir) = directory();
        let stored = directory
            .insert(&User::new("carol", "carol@example.com", "hash".to_string()))
            .await
            .unwrap();
        directory.delete(stored.id).await.unwrap();

        assert_eq!(
            directory.update(&stored).await,
            Err(DirectoryError::EditConflict)
        );
    }

    #[tokio::test]
    async fn delete_frees_email_and_username() {
        let (directory, _dir) = directory();
        let stored = directory
            .insert(&User::new("dave", "dave@example.com", "hash".to_string()))
            .await
            .unwrap();

        directory.delete(stored.id).await.unwrap();
        assert_eq!(directory.get(stored.id).await, Err(DirectoryError::NotFound));
        assert_eq!(
            directory.get_by_email("dave@example.com").await,
            Err(DirectoryError::NotFound)
        );
        assert_eq!(directory.delete(stored.id).await, Err(DirectoryError::NotFound));

        directory
            .insert(&User::new("dave", "dave@example.com", "hash".to_string()))
            .await
            .unwrap();
    }
}
