// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Token Issuance Flows
//!
//! [`TokenIssuer`] ties secret generation, the token store and the two
//! session codecs together:
//!
//! - **Activation**: opaque secret + passcode, persisted by hash. Consumption
//!   requires both; a wrong passcode leaves the secret usable.
//! - **Password reset**: opaque secret only. Consumption rewrites the password
//!   hash.
//! - **Session**: short-lived access credential (stateless) plus a long-lived
//!   refresh credential (persisted). Issuing replaces any refresh credential
//!   the user already holds.
//! - **Refresh**: verifies and rotates the presented refresh credential. A
//!   credential that verifies but has no store record was already rotated away
//!   and is rejected (replay).
//!
//! User records are only changed through [`UserDirectory::update`]. When that
//! reports an edit conflict, every outstanding secret of the flow's purpose is
//! deleted for the user before the conflict is surfaced.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::codec::{CodecError, TokenCodec};
use super::secret::{self, hex_prefix, EntropyError};
use super::store::{OneTimeSecret, RefreshCredential, SecretPurpose, StoreError, TokenStore};
use crate::directory::{DirectoryError, User, UserDirectory};

/// How many fresh secrets to draw before giving up on hash collisions.
pub const MAX_SECRET_ATTEMPTS: usize = 3;

/// Secrets and lifetimes for every credential kind.
#[derive(Clone)]
pub struct TokenSettings {
    /// Issuer and audience of signed credentials
    pub identity: String,
    pub access_secret: Vec<u8>,
    pub refresh_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub activation_ttl: Duration,
    pub reset_ttl: Duration,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("identity", &self.identity)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("activation_ttl", &self.activation_ttl)
            .field("reset_ttl", &self.reset_ttl)
            .finish_non_exhaustive()
    }
}

/// Access and refresh credentials handed out together.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub user_id: Uuid,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("invalid or expired token")]
    InvalidSecret,

    #[error("invalid passcode")]
    InvalidPasscode,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token has expired")]
    ExpiredRefreshToken,

    #[error("user record was modified concurrently")]
    EditConflict,

    #[error("user not found")]
    UserNotFound,

    #[error("could not generate a unique secret after {0} attempts")]
    SecretCollision(usize),

    #[error(transparent)]
    Entropy(#[from] EntropyError),

    #[error("failed to sign credential: {0}")]
    Codec(CodecError),

    #[error("token store: {0}")]
    Store(StoreError),

    #[error("user directory: {0}")]
    Directory(DirectoryError),
}

impl From<StoreError> for IssueError {
    fn from(err: StoreError) -> Self {
        IssueError::Store(err)
    }
}

impl From<DirectoryError> for IssueError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => IssueError::UserNotFound,
            DirectoryError::EditConflict => IssueError::EditConflict,
            other => IssueError::Directory(other),
        }
    }
}

pub type IssueResult<T> = Result<T, IssueError>;

/// Orchestrates every credential flow.
pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
    directory: Arc<dyn UserDirectory>,
    access: TokenCodec,
    refresh: TokenCodec,
    settings: TokenSettings,
}

impl TokenIssuer {
    pub fn new(
        store: Arc<dyn TokenStore>,
        directory: Arc<dyn UserDirectory>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            access: TokenCodec::new(&settings.access_secret, settings.identity.clone()),
            refresh: TokenCodec::new(&settings.refresh_secret, settings.identity.clone()),
            store,
            directory,
            settings,
        }
    }

    /// Codec for access credentials (used by the request middleware).
    pub fn access_codec(&self) -> &TokenCodec {
        &self.access
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    // =========================================================================
    // One-time secrets
    // =========================================================================

    /// Generate and persist a secret, retrying on hash collision.
    async fn issue_one_time_secret(
        &self,
        user_id: Uuid,
        purpose: SecretPurpose,
        with_passcode: bool,
        ttl: Duration,
    ) -> IssueResult<OneTimeSecret> {
        for attempt in 1..=MAX_SECRET_ATTEMPTS {
            let opaque = secret::new_opaque_secret()?;
            let passcode = if with_passcode {
                Some(secret::new_passcode()?)
            } else {
                None
            };

            let record = OneTimeSecret {
                plaintext: opaque.plaintext,
                hash: opaque.hash,
                user_id,
                passcode,
                expires_at: Utc::now() + ttl,
                purpose,
            };

            match self.store.put_one_time_secret(&record).await {
                Ok(()) => {
                    debug!(
                        %user_id,
                        %purpose,
                        hash = %hex_prefix(&record.hash),
                        "Issued one-time secret"
                    );
                    return Ok(record);
                }
                Err(StoreError::Conflict) => {
                    warn!(%user_id, %purpose, attempt, "One-time secret hash collision, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(IssueError::SecretCollision(MAX_SECRET_ATTEMPTS))
    }

    /// Look up a live secret; a missing or expired one is `InvalidSecret`.
    async fn find_secret(
        &self,
        plaintext: &str,
        purpose: SecretPurpose,
    ) -> IssueResult<OneTimeSecret> {
        match self.store.consume_one_time_secret(plaintext, purpose).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound) => Err(IssueError::InvalidSecret),
            Err(err) => Err(err.into()),
        }
    }

    /// Write `user` and clean up secrets of `purpose` whatever the outcome.
    ///
    /// On success the secrets are spent; on an edit conflict they must not be
    /// replayed against the stale record.
    async fn commit_user_change(&self, user: &User, purpose: SecretPurpose) -> IssueResult<User> {
        match self.directory.update(user).await {
            Ok(updated) => {
                self.store
                    .delete_one_time_secrets_for_user(user.id, purpose)
                    .await?;
                Ok(updated)
            }
            Err(DirectoryError::EditConflict) => {
                warn!(user_id = %user.id, %purpose, "Edit conflict, invalidating outstanding secrets");
                self.store
                    .delete_one_time_secrets_for_user(user.id, purpose)
                    .await?;
                Err(IssueError::EditConflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Issue an activation secret with its passcode.
    pub async fn issue_activation(&self, user_id: Uuid) -> IssueResult<OneTimeSecret> {
        self.issue_one_time_secret(
            user_id,
            SecretPurpose::Activation,
            true,
            self.settings.activation_ttl,
        )
        .await
    }

    /// Consume an activation secret and mark its owner activated.
    ///
    /// A wrong passcode leaves the secret in place so the user can retry.
    pub async fn activate(&self, plaintext: &str, passcode: &str) -> IssueResult<User> {
        let record = self.find_secret(plaintext, SecretPurpose::Activation).await?;

        match self.store.validate_passcode(plaintext, passcode).await {
            Ok(true) => {}
            Ok(false) => return Err(IssueError::InvalidPasscode),
            // Expired between the two lookups
            Err(StoreError::NotFound) => return Err(IssueError::InvalidSecret),
            Err(err) => return Err(err.into()),
        }

        let mut user = self.directory.get(record.user_id).await?;
        user.activated = true;
        let user = self.commit_user_change(&user, SecretPurpose::Activation).await?;

        info!(user_id = %user.id, "User activated");
        Ok(user)
    }

    /// Issue a password-reset secret.
    pub async fn issue_reset(&self, user_id: Uuid) -> IssueResult<OneTimeSecret> {
        self.issue_one_time_secret(
            user_id,
            SecretPurpose::PasswordReset,
            false,
            self.settings.reset_ttl,
        )
        .await
    }

    /// Owner of a live reset secret, without spending it.
    ///
    /// Callers check the secret before hashing the new password.
    pub async fn check_reset(&self, plaintext: &str) -> IssueResult<Uuid> {
        let record = self
            .find_secret(plaintext, SecretPurpose::PasswordReset)
            .await?;
        Ok(record.user_id)
    }

    /// Consume a reset secret and store `password_hash` for its owner.
    pub async fn reset_password(&self, plaintext: &str, password_hash: String) -> IssueResult<User> {
        let record = self
            .find_secret(plaintext, SecretPurpose::PasswordReset)
            .await?;

        let mut user = self.directory.get(record.user_id).await?;
        user.password_hash = Some(password_hash);
        let user = self
            .commit_user_change(&user, SecretPurpose::PasswordReset)
            .await?;

        info!(user_id = %user.id, "Password reset");
        Ok(user)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Mint a pair and persist the refresh half through `rotate`.
    async fn mint_session(&self, user_id: Uuid, presented: Option<&str>) -> IssueResult<SessionTokens> {
        let access_claims = self.access.claims_for(user_id, self.settings.access_ttl);
        let refresh_claims = self.refresh.claims_for(user_id, self.settings.refresh_ttl);

        let access_token = self.access.sign(&access_claims).map_err(IssueError::Codec)?;
        let refresh_token = self
            .refresh
            .sign(&refresh_claims)
            .map_err(IssueError::Codec)?;

        let credential = RefreshCredential {
            token: refresh_token.clone(),
            user_id,
            issued_at: Utc::now(),
            expires_at: refresh_claims.expires_at(),
        };
        self.store
            .rotate_refresh_credential(&credential, presented)
            .await?;

        Ok(SessionTokens {
            user_id,
            access_token,
            access_expires_at: access_claims.expires_at(),
            refresh_token,
            refresh_expires_at: credential.expires_at,
        })
    }

    /// Issue an access/refresh pair, replacing any refresh credential the user holds.
    pub async fn issue_session(&self, user_id: Uuid) -> IssueResult<SessionTokens> {
        let tokens = self.mint_session(user_id, None).await?;
        debug!(%user_id, "Issued session");
        Ok(tokens)
    }

    /// Rotate a refresh credential into a new pair.
    pub async fn refresh_session(&self, refresh_token: &str) -> IssueResult<SessionTokens> {
        let claims = match self.refresh.verify(refresh_token) {
            Ok(claims) => claims,
            Err(CodecError::Expired) => {
                match self.store.delete_refresh_credential(refresh_token).await {
                    Ok(()) | Err(StoreError::NotFound) => {}
                    Err(err) => return Err(err.into()),
                }
                return Err(IssueError::ExpiredRefreshToken);
            }
            Err(err) => {
                debug!(error = %err, "Refresh token failed verification");
                return Err(IssueError::InvalidRefreshToken);
            }
        };

        let owner = match self.store.get_refresh_owner(refresh_token).await {
            Ok(owner) => owner,
            Err(StoreError::NotFound) => {
                warn!(subject = %claims.sub, "Refresh token replayed after rotation");
                return Err(IssueError::InvalidRefreshToken);
            }
            Err(err) => return Err(err.into()),
        };
        if claims.sub != owner.to_string() {
            warn!(subject = %claims.sub, %owner, "Refresh token subject does not match its owner");
            return Err(IssueError::InvalidRefreshToken);
        }

        match self.mint_session(owner, Some(refresh_token)).await {
            Ok(tokens) => {
                debug!(user_id = %owner, "Rotated refresh token");
                Ok(tokens)
            }
            // Lost a race with a concurrent rotation of the same credential
            Err(IssueError::Store(StoreError::NotFound)) => {
                warn!(user_id = %owner, "Refresh token rotated concurrently");
                Err(IssueError::InvalidRefreshToken)
            }
            Err(err) => Err(err),
        }
    }

    /// Drop every refresh credential the user holds.
    pub async fn logout(&self, user_id: Uuid) -> IssueResult<()> {
        self.store.delete_refresh_credentials_for_user(user_id).await?;
        info!(%user_id, "Logged out");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_database;
    use crate::storage::{RedbTokenStore, RedbUserDirectory};
    use crate::tokens::codec::SessionClaims;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Harness {
        issuer: TokenIssuer,
        store: Arc<RedbTokenStore>,
        directory: Arc<RedbUserDirectory>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let (db, dir) = temp_database();
        let store = Arc::new(RedbTokenStore::new(db.clone()));
        let directory = Arc::new(RedbUserDirectory::new(db));
        let issuer = TokenIssuer::new(store.clone(), directory.clone(), test_support::settings());
        Harness {
            issuer,
            store,
            directory,
            _dir: dir,
        }
    }

    async fn new_user(h: &Harness, name: &str) -> User {
        h.directory
            .insert(&User::new(name, format!("{name}@example.com"), "old-hash".to_string()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn activation_with_correct_passcode_activates() {
        let h = harness();
        let user = new_user(&h, "alice").await;
        let secret = h.issuer.issue_activation(user.id).await.unwrap();
        let passcode = secret.passcode.clone().unwrap();

        let activated = h.issuer.activate(&secret.plaintext, &passcode).await.unwrap();
        assert!(activated.activated);
        assert_eq!(activated.version, user.version + 1);

        // Spent
        assert!(matches!(
            h.issuer.activate(&secret.plaintext, &passcode).await,
            Err(IssueError::InvalidSecret)
        ));
    }

    #[tokio::test]
    async fn wrong_passcode_leaves_secret_for_retry() {
        let h = harness();
        let user = new_user(&h, "bob").await;
        let secret = h.issuer.issue_activation(user.id).await.unwrap();
        let passcode = secret.passcode.clone().unwrap();
        let wrong = if passcode == "000000" { "111111" } else { "000000" };

        assert!(matches!(
            h.issuer.activate(&secret.plaintext, wrong).await,
            Err(IssueError::InvalidPasscode)
        ));
        assert!(!h.directory.get(user.id).await.unwrap().activated);

        assert!(h.issuer.activate(&secret.plaintext, &passcode).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_secret_is_invalid() {
        let h = harness();
        assert!(matches!(
            h.issuer.activate("AAAAAAAAAAAAAAAAAAAAAAAAAA", "123456").await,
            Err(IssueError::InvalidSecret)
        ));
    }

    #[tokio::test]
    async fn two_activation_secrets_are_independent_until_one_is_used() {
        let h = harness();
        let user = new_user(&h, "carol").await;
        let first = h.issuer.issue_activation(user.id).await.unwrap();
        let second = h.issuer.issue_activation(user.id).await.unwrap();
        assert_ne!(first.plaintext, second.plaintext);

        for secret in [&first, &second] {
            assert!(h
                .store
                .consume_one_time_secret(&secret.plaintext, SecretPurpose::Activation)
                .await
                .is_ok());
        }

        h.issuer
            .activate(&second.plaintext, second.passcode.as_deref().unwrap())
            .await
            .unwrap();

        // Successful activation deletes every activation secret of the user
        assert!(matches!(
            h.issuer
                .activate(&first.plaintext, first.passcode.as_deref().unwrap())
                .await,
            Err(IssueError::InvalidSecret)
        ));
    }

    /// Directory whose updates always lose the version race.
    struct ConflictingDirectory(Arc<RedbUserDirectory>);

    #[async_trait]
    impl UserDirectory for ConflictingDirectory {
        async fn get(&self, id: Uuid) -> crate::directory::DirectoryResult<User> {
            self.0.get(id).await
        }
        async fn get_by_email(&self, email: &str) -> crate::directory::DirectoryResult<User> {
            self.0.get_by_email(email).await
        }
        async fn get_by_username(&self, username: &str) -> crate::directory::DirectoryResult<User> {
            self.0.get_by_username(username).await
        }
        async fn insert(&self, user: &User) -> crate::directory::DirectoryResult<User> {
            self.0.insert(user).await
        }
        async fn update(&self, _user: &User) -> crate::directory::DirectoryResult<User> {
            Err(DirectoryError::EditConflict)
        }
        async fn delete(&self, id: Uuid) -> crate::directory::DirectoryResult<()> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn edit_conflict_invalidates_outstanding_activation_secrets() {
        let h = harness();
        let user = new_user(&h, "dave").await;
        let first = h.issuer.issue_activation(user.id).await.unwrap();
        let second = h.issuer.issue_activation(user.id).await.unwrap();

        let conflicting = TokenIssuer::new(
            h.store.clone(),
            Arc::new(ConflictingDirectory(h.directory.clone())),
            test_support::settings(),
        );
        assert!(matches!(
            conflicting
                .activate(&first.plaintext, first.passcode.as_deref().unwrap())
                .await,
            Err(IssueError::EditConflict)
        ));

        for secret in [&first, &second] {
            assert_eq!(
                h.store
                    .consume_one_time_secret(&secret.plaintext, SecretPurpose::Activation)
                    .await,
                Err(StoreError::NotFound)
            );
        }
    }

    #[tokio::test]
    async fn reset_rewrites_hash_and_spends_older_links() {
        let h = harness();
        let user = new_user(&h, "erin").await;
        let older = h.issuer.issue_reset(user.id).await.unwrap();
        let newer = h.issuer.issue_reset(user.id).await.unwrap();
        assert!(older.passcode.is_none());

        let updated = h
            .issuer
            .reset_password(&newer.plaintext, "new-hash".to_string())
            .await
            .unwrap();
        assert_eq!(updated.password_hash.as_deref(), Some("new-hash"));

        assert!(matches!(
            h.issuer
                .reset_password(&older.plaintext, "other-hash".to_string())
                .await,
            Err(IssueError::InvalidSecret)
        ));
    }

    #[tokio::test]
    async fn check_reset_names_the_owner_and_keeps_the_secret() {
        let h = harness();
        let user = new_user(&h, "ivan").await;
        let secret = h.issuer.issue_reset(user.id).await.unwrap();

        assert_eq!(h.issuer.check_reset(&secret.plaintext).await.unwrap(), user.id);
        assert_eq!(h.issuer.check_reset(&secret.plaintext).await.unwrap(), user.id);
        assert!(matches!(
            h.issuer.check_reset("AAAAAAAAAAAAAAAAAAAAAAAAAA").await,
            Err(IssueError::InvalidSecret)
        ));

        h.issuer
            .reset_password(&secret.plaintext, "new-hash".to_string())
            .await
            .unwrap();
        assert!(matches!(
            h.issuer.check_reset(&secret.plaintext).await,
            Err(IssueError::InvalidSecret)
        ));
    }

    #[tokio::test]
    async fn edit_conflict_invalidates_outstanding_reset_secrets() {
        let h = harness();
        let user = new_user(&h, "judy").await;
        let first = h.issuer.issue_reset(user.id).await.unwrap();
        let second = h.issuer.issue_reset(user.id).await.unwrap();

        let conflicting = TokenIssuer::new(
            h.store.clone(),
            Arc::new(ConflictingDirectory(h.directory.clone())),
            test_support::settings(),
        );
        assert!(matches!(
            conflicting
                .reset_password(&first.plaintext, "new-hash".to_string())
                .await,
            Err(IssueError::EditConflict)
        ));

        for secret in [&first, &second] {
            assert_eq!(
                h.store
                    .consume_one_time_secret(&secret.plaintext, SecretPurpose::PasswordReset)
                    .await,
                Err(StoreError::NotFound)
            );
        }
        assert_eq!(
            h.directory.get(user.id).await.unwrap().password_hash.as_deref(),
            Some("old-hash")
        );
    }

    #[tokio::test]
    async fn activation_secret_cannot_reset_a_password() {
        let h = harness();
        let user = new_user(&h, "frank").await;
        let secret = h.issuer.issue_activation(user.id).await.unwrap();

        assert!(matches!(
            h.issuer
                .reset_password(&secret.plaintext, "new-hash".to_string())
                .await,
            Err(IssueError::InvalidSecret)
        ));
    }

    #[tokio::test]
    async fn session_access_token_verifies_with_access_codec_only() {
        let h = harness();
        let user = new_user(&h, "grace").await;
        let tokens = h.issuer.issue_session(user.id).await.unwrap();

        let claims = h.issuer.access_codec().verify(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert!(h
            .issuer
            .access_codec()
            .verify(&tokens.refresh_token)
            .is_err());
        assert!(tokens.refresh_expires_at > tokens.access_expires_at);
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_rejected_on_replay() {
        let h = harness();
        let user = new_user(&h, "heidi").await;
        let first = h.issuer.issue_session(user.id).await.unwrap();

        let second = h.issuer.refresh_session(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        assert!(matches!(
            h.issuer.refresh_session(&first.refresh_token).await,
            Err(IssueError::InvalidRefreshToken)
        ));
        // The live credential is untouched by the replay attempt
        assert!(h.issuer.refresh_session(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn at_most_one_refresh_credential_per_user() {
        let h = harness();
        let user = new_user(&h, "ivan").await;

        let a = h.issuer.issue_session(user.id).await.unwrap();
        let b = h.issuer.issue_session(user.id).await.unwrap();
        let c = h.issuer.refresh_session(&b.refresh_token).await.unwrap();

        let mut live = 0;
        for token in [&a.refresh_token, &b.refresh_token, &c.refresh_token] {
            if h.store.get_refresh_owner(token).await.is_ok() {
                live += 1;
            }
        }
        assert_eq!(live, 1);

        h.issuer.logout(user.id).await.unwrap();
        assert_eq!(
            h.store.get_refresh_owner(&c.refresh_token).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn expired_refresh_token_is_deleted() {
        let h = harness();
        let user = new_user(&h, "judy").await;
        let codec = TokenCodec::new(b"refresh-secret-for-tests", "https://auth.example.test");

        let claims = SessionClaims::new(
            user.id,
            codec.identity(),
            Utc::now() - Duration::hours(2),
            Duration::hours(1),
        );
        let token = codec.sign(&claims).unwrap();
        h.store
            .put_refresh_credential(&RefreshCredential {
                token: token.clone(),
                user_id: user.id,
                issued_at: Utc::now() - Duration::hours(2),
                // Store record outlives the signed expiry so the cleanup is observable
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        assert!(matches!(
            h.issuer.refresh_session(&token).await,
            Err(IssueError::ExpiredRefreshToken)
        ));
        assert_eq!(h.store.get_refresh_owner(&token).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let h = harness();
        let user = new_user(&h, "mallory").await;
        let tokens = h.issuer.issue_session(user.id).await.unwrap();

        assert!(matches!(
            h.issuer.refresh_session(&tokens.access_token).await,
            Err(IssueError::InvalidRefreshToken)
        ));
    }
}
