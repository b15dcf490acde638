// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::extract::FromRef;
use url::Url;

use crate::auth::Authenticator;
use crate::config::{AccessTransport, ServerConfig};
use crate::directory::UserDirectory;
use crate::identity::IdentityVerifier;
use crate::notify::Notifier;
use crate::storage::{AuthDatabase, RedbTokenStore, RedbUserDirectory};
use crate::tasks::BackgroundTaskRunner;
use crate::tokens::{TokenIssuer, TokenSettings, TokenStore};

#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub authenticator: Arc<Authenticator>,
    pub directory: Arc<dyn UserDirectory>,
    pub store: Arc<dyn TokenStore>,
    pub notifier: Arc<dyn Notifier>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub tasks: BackgroundTaskRunner,
    /// Base for password-reset links
    pub frontend_url: Url,
}

impl AppState {
    /// Wire the redb-backed store and directory into the token core.
    pub fn new(
        config: &ServerConfig,
        db: AuthDatabase,
        notifier: Arc<dyn Notifier>,
        identity: Arc<dyn IdentityVerifier>,
        tasks: BackgroundTaskRunner,
    ) -> Self {
        let store: Arc<dyn TokenStore> = Arc::new(RedbTokenStore::new(db.clone()));
        let directory: Arc<dyn UserDirectory> = Arc::new(RedbUserDirectory::new(db));

        Self::with_parts(
            config.tokens.clone(),
            config.transport,
            config.revoke_refresh_on_access_expiry,
            config.frontend_url.clone(),
            store,
            directory,
            notifier,
            identity,
            tasks,
        )
    }

    /// Build from explicit collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        tokens: TokenSettings,
        transport: AccessTransport,
        revoke_refresh_on_access_expiry: bool,
        frontend_url: Url,
        store: Arc<dyn TokenStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        identity: Arc<dyn IdentityVerifier>,
        tasks: BackgroundTaskRunner,
    ) -> Self {
        let issuer = TokenIssuer::new(store.clone(), directory.clone(), tokens);
        let authenticator = Authenticator::new(
            issuer.access_codec().clone(),
            directory.clone(),
            store.clone(),
            transport,
        )
        .with_refresh_revocation_on_expiry(revoke_refresh_on_access_expiry);

        Self {
            issuer: Arc::new(issuer),
            authenticator: Arc::new(authenticator),
            directory,
            store,
            notifier,
            identity,
            tasks,
            frontend_url,
        }
    }
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}
