// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! redb-backed [`TokenStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    AuthDatabase, DbError, DbResult, ACTIVATION_BY_USER, ACTIVATION_TOKENS, REFRESH_BY_USER,
    REFRESH_TOKENS, RESET_BY_USER, RESET_TOKENS,
};
use crate::tokens::secret::hash_secret;
use crate::tokens::store::{
    OneTimeSecret, RefreshCredential, SecretPurpose, StoreResult, TokenStore,
};

type SecretTable = TableDefinition<'static, &'static [u8], &'static [u8]>;
type UserIndex = TableDefinition<'static, &'static [u8], ()>;

/// Record table and per-user index for a purpose.
fn secret_tables(purpose: SecretPurpose) -> (SecretTable, UserIndex) {
    match purpose {
        SecretPurpose::Activation => (ACTIVATION_TOKENS, ACTIVATION_BY_USER),
        SecretPurpose::PasswordReset => (RESET_TOKENS, RESET_BY_USER),
    }
}

/// One-time secret record as persisted (the plaintext never is).
#[derive(Debug, Serialize, Deserialize)]
struct StoredSecret {
    user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passcode: Option<String>,
    expires_at: DateTime<Utc>,
}

/// Refresh credential record, keyed by the signed token.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRefresh {
    user_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Token store over the shared [`AuthDatabase`].
#[derive(Clone)]
pub struct RedbTokenStore {
    db: AuthDatabase,
}

impl RedbTokenStore {
    pub fn new(db: AuthDatabase) -> Self {
        Self { db }
    }
}

// =============================================================================
// Per-user index helpers
// =============================================================================

/// Index key: 16 bytes of user id followed by the indexed key.
fn index_key(user_id: Uuid, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + key.len());
    out.extend_from_slice(user_id.as_bytes());
    out.extend_from_slice(key);
    out
}

/// Keys indexed under `user_id`, user prefix stripped.
fn indexed_for_user(
    index: &Table<'_, &'static [u8], ()>,
    user_id: Uuid,
) -> DbResult<Vec<Vec<u8>>> {
    let prefix = user_id.as_bytes();
    let mut keys = Vec::new();
    for entry in index.range(&prefix[..]..)? {
        let (key, _) = entry?;
        let Some(rest) = key.value().strip_prefix(&prefix[..]) else {
            break;
        };
        keys.push(rest.to_vec());
    }
    Ok(keys)
}

fn read_secret(db: &Database, table: SecretTable, hash: &[u8]) -> DbResult<StoredSecret> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let value = table.get(hash)?.ok_or(DbError::NotFound)?;
    Ok(serde_json::from_slice(value.value())?)
}

/// Remove every `purpose` secret that belongs to `user_id`.
fn remove_secrets_for_user(
    write_txn: &WriteTransaction,
    purpose: SecretPurpose,
    user_id: Uuid,
) -> DbResult<usize> {
    let (table, index) = secret_tables(purpose);
    let mut table = write_txn.open_table(table)?;
    let mut index = write_txn.open_table(index)?;

    let hashes = indexed_for_user(&index, user_id)?;
    for hash in &hashes {
        table.remove(hash.as_slice())?;
        index.remove(index_key(user_id, hash).as_slice())?;
    }
    Ok(hashes.len())
}

fn remove_refresh_for_user(write_txn: &WriteTransaction, user_id: Uuid) -> DbResult<usize> {
    let mut table = write_txn.open_table(REFRESH_TOKENS)?;
    let mut index = write_txn.open_table(REFRESH_BY_USER)?;

    let tokens = indexed_for_user(&index, user_id)?;
    for token in &tokens {
        let token_str = std::str::from_utf8(token).map_err(|_| DbError::CorruptIndex)?;
        table.remove(token_str)?;
        index.remove(index_key(user_id, token).as_slice())?;
    }
    Ok(tokens.len())
}

fn insert_refresh(
    write_txn: &WriteTransaction,
    user_id: Uuid,
    token: &str,
    json: &[u8],
) -> DbResult<()> {
    let mut table = write_txn.open_table(REFRESH_TOKENS)?;
    let mut index = write_txn.open_table(REFRESH_BY_USER)?;
    table.insert(token, json)?;
    index.insert(index_key(user_id, token.as_bytes()).as_slice(), ())?;
    Ok(())
}

#[async_trait]
impl TokenStore for RedbTokenStore {
    async fn put_one_time_secret(&self, secret: &OneTimeSecret) -> StoreResult<()> {
        let (table, index) = secret_tables(secret.purpose);
        let user_id = secret.user_id;
        let hash = secret.hash;
        let json = serde_json::to_vec(&StoredSecret {
            user_id: secret.user_id,
            passcode: secret.passcode.clone(),
            expires_at: secret.expires_at,
        })
        .map_err(DbError::from)?;

        self.db
            .run(move |db| {
                let write_txn = db.begin_write()?;
                {
                    let mut table = write_txn.open_table(table)?;
                    if table.get(&hash[..])?.is_some() {
                        return Err(DbError::Duplicate("hash"));
                    }
                    table.insert(&hash[..], json.as_slice())?;
                    let mut index = write_txn.open_table(index)?;
                    index.insert(index_key(user_id, &hash).as_slice(), ())?;
                }
                write_txn.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn consume_one_time_secret(
        &self,
        plaintext: &str,
        purpose: SecretPurpose,
    ) -> StoreResult<OneTimeSecret> {
        let (table, index) = secret_tables(purpose);
        let hash = hash_secret(plaintext);

        let record = self
            .db
            .run(move |db| {
                let write_txn = db.begin_write()?;
                let record = {
                    let mut table = write_txn.open_table(table)?;
                    let bytes = table
                        .get(&hash[..])?
                        .map(|value| value.value().to_vec())
                        .ok_or(DbError::NotFound)?;
                    let record: StoredSecret = serde_json::from_slice(&bytes)?;

                    if record.expires_at <= Utc::now() {
                        table.remove(&hash[..])?;
                        let mut index = write_txn.open_table(index)?;
                        index.remove(index_key(record.user_id, &hash).as_slice())?;
                        None
                    } else {
                        Some(record)
                    }
                };
                // Commits the lazy removal of an expired record; a no-op otherwise
                write_txn.commit()?;
                record.ok_or(DbError::NotFound)
            })
            .await?;

        Ok(OneTimeSecret {
            plaintext: plaintext.to_string(),
            hash,
            user_id: record.user_id,
            passcode: record.passcode,
            expires_at: record.expires_at,
            purpose,
        })
    }

    async fn validate_passcode(&self, plaintext: &str, passcode: &str) -> StoreResult<bool> {
        let hash = hash_secret(plaintext);

        let record = self
            .db
            .run(move |db| read_secret(db, ACTIVATION_TOKENS, &hash))
            .await?;

        if record.expires_at <= Utc::now() {
            return Err(DbError::NotFound.into());
        }
        Ok(record.passcode.as_deref() == Some(passcode))
    }

    async fn delete_one_time_secrets_for_user(
        &self,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> StoreResult<()> {
        let removed = self
            .db
            .run(move |db| {
                let write_txn = db.begin_write()?;
                let removed = remove_secrets_for_user(&write_txn, purpose, user_id)?;
                write_txn.commit()?;
                Ok(removed)
            })
            .await?;

        tracing::debug!(%user_id, %purpose, removed, "Deleted one-time secrets");
        Ok(())
    }

    async fn put_refresh_credential(&self, credential: &RefreshCredential) -> StoreResult<()> {
        let user_id = credential.user_id;
        let token = credential.token.clone();
        let json = serde_json::to_vec(&StoredRefresh {
            user_id: credential.user_id,
            issued_at: credential.issued_at,
            expires_at: credential.expires_at,
        })
        .map_err(DbError::from)?;

        self.db
            .run(move |db| {
                let write_txn = db.begin_write()?;
                {
                    let table = write_txn.open_table(REFRESH_TOKENS)?;
                    if table.get(token.as_str())?.is_some() {
                        return Err(DbError::Duplicate("refresh_token"));
                    }
                }
                insert_refresh(&write_txn, user_id, &token, &json)?;
                write_txn.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_refresh_owner(&self, token: &str) -> StoreResult<Uuid> {
        let token = token.to_string();

        let record = self
            .db
            .run(move |db| {
                let read_txn = db.begin_read()?;
                let table = read_txn.open_table(REFRESH_TOKENS)?;
                let value = table.get(token.as_str())?.ok_or(DbError::NotFound)?;
                let record: StoredRefresh = serde_json::from_slice(value.value())?;
                Ok(record)
            })
            .await?;

        if record.expires_at <= Utc::now() {
            return Err(DbError::NotFound.into());
        }
        Ok(record.user_id)
    }

    async fn delete_refresh_credential(&self, token: &str) -> StoreResult<()> {
        let token = token.to_string();

        self.db
            .run(move |db| {
                let write_txn = db.begin_write()?;
                let owner = {
                    let mut table = write_txn.open_table(REFRESH_TOKENS)?;
                    let owner = table
                        .remove(token.as_str())?
                        .map(|value| serde_json::from_slice::<StoredRefresh>(value.value()))
                        .transpose()?
                        .map(|record| record.user_id);
                    owner
                };
                let Some(owner) = owner else {
                    return Err(DbError::NotFound);
                };
                {
                    let mut index = write_txn.open_table(REFRESH_BY_USER)?;
                    index.remove(index_key(owner, token.as_bytes()).as_slice())?;
                }
                write_txn.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete_refresh_credentials_for_user(&self, user_id: Uuid) -> StoreResult<()> {
        let removed = self
            .db
            .run(move |db| {
                let write_txn = db.begin_write()?;
                let removed = remove_refresh_for_user(&write_txn, user_id)?;
                write_txn.commit()?;
                Ok(removed)
            })
            .await?;

        tracing::debug!(%user_id, removed, "Deleted refresh credentials");
        Ok(())
    }

    async fn rotate_refresh_credential(
        &self,
        credential: &RefreshCredential,
        presented: Option<&str>,
    ) -> StoreResult<()> {
        let user_id = credential.user_id;
        let token = credential.token.clone();
        let presented = presented.map(str::to_string);
        let json = serde_json::to_vec(&StoredRefresh {
            user_id,
            issued_at: credential.issued_at,
            expires_at: credential.expires_at,
        })
        .map_err(DbError::from)?;

        self.db
            .run(move |db| {
                let write_txn = db.begin_write()?;

                if let Some(presented) = presented {
                    let table = write_txn.open_table(REFRESH_TOKENS)?;
                    let bytes = table
                        .get(presented.as_str())?
                        .map(|value| value.value().to_vec())
                        .ok_or(DbError::NotFound)?;
                    let record: StoredRefresh = serde_json::from_slice(&bytes)?;
                    if record.user_id != user_id || record.expires_at <= Utc::now() {
                        return Err(DbError::NotFound);
                    }
                }

                remove_refresh_for_user(&write_txn, user_id)?;
                insert_refresh(&write_txn, user_id, &token, &json)?;
                write_txn.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_database;
    use crate::tokens::secret::new_opaque_secret;
    use crate::tokens::store::StoreError;
    use chrono::Duration;
    use redb::ReadableTableMetadata;

    fn activation_secret(user_id: Uuid, expires_in: Duration) -> OneTimeSecret {
        let opaque = new_opaque_secret().unwrap();
        OneTimeSecret {
            plaintext: opaque.plaintext,
            hash: opaque.hash,
            user_id,
            passcode: Some("123456".to_string()),
            expires_at: Utc::now() + expires_in,
            purpose: SecretPurpose::Activation,
        }
    }

    fn refresh(user_id: Uuid, token: &str) -> RefreshCredential {
        let now = Utc::now();
        RefreshCredential {
            token: token.to_string(),
            user_id,
            issued_at: now,
            expires_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn consume_finds_live_secret_without_deleting_it() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let secret = activation_secret(Uuid::new_v4(), Duration::hours(1));
        store.put_one_time_secret(&secret).await.unwrap();

        let found = store
            .consume_one_time_secret(&secret.plaintext, SecretPurpose::Activation)
            .await
            .unwrap();
        assert_eq!(found, secret);

        // Still there for a retry
        assert!(store
            .consume_one_time_secret(&secret.plaintext, SecretPurpose::Activation)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn purposes_do_not_share_a_table() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let secret = activation_secret(Uuid::new_v4(), Duration::hours(1));
        store.put_one_time_secret(&secret).await.unwrap();

        let result = store
            .consume_one_time_secret(&secret.plaintext, SecretPurpose::PasswordReset)
            .await;
        assert_eq!(result, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn expired_secret_is_not_found_and_removed() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db.clone());
        let secret = activation_secret(Uuid::new_v4(), Duration::seconds(-1));
        store.put_one_time_secret(&secret).await.unwrap();

        let result = store
            .consume_one_time_secret(&secret.plaintext, SecretPurpose::Activation)
            .await;
        assert_eq!(result, Err(StoreError::NotFound));

        let hash = secret.hash;
        let gone = db
            .run(move |db| match read_secret(db, ACTIVATION_TOKENS, &hash) {
                Err(DbError::NotFound) => Ok(true),
                Err(e) => Err(e),
                Ok(_) => Ok(false),
            })
            .await
            .unwrap();
        assert!(gone);
    }

    #[tokio::test]
    async fn duplicate_hash_is_conflict() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let secret = activation_secret(Uuid::new_v4(), Duration::hours(1));
        store.put_one_time_secret(&secret).await.unwrap();

        assert_eq!(
            store.put_one_time_secret(&secret).await,
            Err(StoreError::Conflict)
        );
    }

    #[tokio::test]
    async fn passcode_is_compared_exactly() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let secret = activation_secret(Uuid::new_v4(), Duration::hours(1));
        store.put_one_time_secret(&secret).await.unwrap();

        assert!(store
            .validate_passcode(&secret.plaintext, "123456")
            .await
            .unwrap());
        assert!(!store
            .validate_passcode(&secret.plaintext, "654321")
            .await
            .unwrap());
        assert_eq!(
            store.validate_passcode("UNKNOWNUNKNOWNUNKNOWNUNKNO", "123456").await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn per_user_delete_leaves_other_users_alone() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let first = activation_secret(alice, Duration::hours(1));
        let second = activation_secret(alice, Duration::hours(1));
        let other = activation_secret(bob, Duration::hours(1));
        for secret in [&first, &second, &other] {
            store.put_one_time_secret(secret).await.unwrap();
        }

        store
            .delete_one_time_secrets_for_user(alice, SecretPurpose::Activation)
            .await
            .unwrap();

        for gone in [&first, &second] {
            assert_eq!(
                store
                    .consume_one_time_secret(&gone.plaintext, SecretPurpose::Activation)
                    .await,
                Err(StoreError::NotFound)
            );
        }
        assert!(store
            .consume_one_time_secret(&other.plaintext, SecretPurpose::Activation)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn refresh_owner_lookup_and_delete() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let user_id = Uuid::new_v4();
        store.put_refresh_credential(&refresh(user_id, "r1")).await.unwrap();

        assert_eq!(store.get_refresh_owner("r1").await.unwrap(), user_id);

        store.delete_refresh_credential("r1").await.unwrap();
        assert_eq!(store.get_refresh_owner("r1").await, Err(StoreError::NotFound));
        assert_eq!(
            store.delete_refresh_credential("r1").await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn rotation_keeps_a_single_credential_per_user() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        store.rotate_refresh_credential(&refresh(user_id, "a"), None).await.unwrap();
        store.rotate_refresh_credential(&refresh(other, "x"), None).await.unwrap();
        store.rotate_refresh_credential(&refresh(user_id, "b"), None).await.unwrap();

        assert_eq!(store.get_refresh_owner("a").await, Err(StoreError::NotFound));
        assert_eq!(store.get_refresh_owner("b").await.unwrap(), user_id);
        assert_eq!(store.get_refresh_owner("x").await.unwrap(), other);
    }

    #[tokio::test]
    async fn rotation_from_a_stale_token_changes_nothing() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let user_id = Uuid::new_v4();

        store.rotate_refresh_credential(&refresh(user_id, "a"), None).await.unwrap();
        store
            .rotate_refresh_credential(&refresh(user_id, "b"), Some("a"))
            .await
            .unwrap();

        // "a" was rotated away; presenting it again must not mint "c"
        assert_eq!(
            store
                .rotate_refresh_credential(&refresh(user_id, "c"), Some("a"))
                .await,
            Err(StoreError::NotFound)
        );
        assert_eq!(store.get_refresh_owner("b").await.unwrap(), user_id);
        assert_eq!(store.get_refresh_owner("c").await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn rotation_rejects_another_users_token() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let alice = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        store.rotate_refresh_credential(&refresh(alice, "a"), None).await.unwrap();

        assert_eq!(
            store
                .rotate_refresh_credential(&refresh(mallory, "m"), Some("a"))
                .await,
            Err(StoreError::NotFound)
        );
        assert_eq!(store.get_refresh_owner("a").await.unwrap(), alice);
    }

    async fn index_len(db: &AuthDatabase, index: UserIndex) -> u64 {
        db.run(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(index)?;
            Ok(table.len()?)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn user_index_follows_every_removal() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db.clone());
        let user_id = Uuid::new_v4();

        let expired = activation_secret(user_id, Duration::seconds(-1));
        let live = activation_secret(user_id, Duration::hours(1));
        store.put_one_time_secret(&expired).await.unwrap();
        store.put_one_time_secret(&live).await.unwrap();
        assert_eq!(index_len(&db, ACTIVATION_BY_USER).await, 2);

        let _ = store
            .consume_one_time_secret(&expired.plaintext, SecretPurpose::Activation)
            .await;
        assert_eq!(index_len(&db, ACTIVATION_BY_USER).await, 1);

        store
            .delete_one_time_secrets_for_user(user_id, SecretPurpose::Activation)
            .await
            .unwrap();
        assert_eq!(index_len(&db, ACTIVATION_BY_USER).await, 0);

        store.put_refresh_credential(&refresh(user_id, "r1")).await.unwrap();
        store.delete_refresh_credential("r1").await.unwrap();
        assert_eq!(index_len(&db, REFRESH_BY_USER).await, 0);

        store.rotate_refresh_credential(&refresh(user_id, "r2"), None).await.unwrap();
        store.rotate_refresh_credential(&refresh(user_id, "r3"), None).await.unwrap();
        assert_eq!(index_len(&db, REFRESH_BY_USER).await, 1);
        store.delete_refresh_credentials_for_user(user_id).await.unwrap();
        assert_eq!(index_len(&db, REFRESH_BY_USER).await, 0);
    }

    #[tokio::test]
    async fn unreadable_record_of_another_user_does_not_block_rotation() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db.clone());
        db.run(|db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(REFRESH_TOKENS)?;
                table.insert("garbage", b"not json".as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .unwrap();

        let user_id = Uuid::new_v4();
        store.rotate_refresh_credential(&refresh(user_id, "a"), None).await.unwrap();
        store
            .rotate_refresh_credential(&refresh(user_id, "b"), Some("a"))
            .await
            .unwrap();
        assert_eq!(store.get_refresh_owner("b").await.unwrap(), user_id);
        store.delete_refresh_credentials_for_user(user_id).await.unwrap();
        assert_eq!(store.get_refresh_owner("b").await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn user_prefixes_do_not_bleed_into_neighbours() {
        let (db, _dir) = temp_database();
        let store = RedbTokenStore::new(db);
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        store.put_refresh_credential(&refresh(low, "low")).await.unwrap();
        store.put_refresh_credential(&refresh(high, "high")).await.unwrap();

        store.delete_refresh_credentials_for_user(low).await.unwrap();
        assert_eq!(store.get_refresh_owner("low").await, Err(StoreError::NotFound));
        assert_eq!(store.get_refresh_owner("high").await.unwrap(), high);
    }
}
