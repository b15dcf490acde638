// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request authentication.
//!
//! [`Authenticator::authenticate`] turns the inbound credential into an
//! [`AuthVerdict`]:
//!
//! | Input | Verdict |
//! |-------|---------|
//! | No credential | `Anonymous` |
//! | Header not of the form `Bearer <token>` | `Rejected(InvalidAuthenticationToken)` |
//! | Bad signature, issuer or audience | `Rejected(InvalidAuthenticationToken)` |
//! | Expired or not yet valid | `Rejected(ExpiredToken)` |
//! | Valid, user unknown | `Rejected(InvalidAuthenticationToken)` |
//! | Valid, directory unreachable | `Rejected(ServerError)` |
//! | Valid, user found | `Authenticated(user)` |
//!
//! The [`authenticate`] middleware stores the verdict in the request
//! extensions, answers rejections itself, and marks every response with
//! `Vary: Authorization`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, VARY},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::cookies::{read_cookie, ACCESS_COOKIE_NAME};
use super::AuthError;
use crate::config::AccessTransport;
use crate::directory::{DirectoryError, User, UserDirectory};
use crate::tokens::{CodecError, TokenCodec, TokenStore};

/// Outcome of authenticating one request.
#[derive(Debug, Clone)]
pub enum AuthVerdict {
    Anonymous,
    Rejected(AuthError),
    Authenticated(User),
}

/// Resolves access credentials to users.
pub struct Authenticator {
    codec: TokenCodec,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn TokenStore>,
    transport: AccessTransport,
    revoke_refresh_on_expiry: bool,
}

impl Authenticator {
    pub fn new(
        codec: TokenCodec,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn TokenStore>,
        transport: AccessTransport,
    ) -> Self {
        Self {
            codec,
            directory,
            store,
            transport,
            revoke_refresh_on_expiry: false,
        }
    }

    /// Also drop the owner's refresh credentials when an expired access
    /// credential is presented.
    pub fn with_refresh_revocation_on_expiry(mut self, enabled: bool) -> Self {
        self.revoke_refresh_on_expiry = enabled;
        self
    }

    pub fn transport(&self) -> AccessTransport {
        self.transport
    }

    /// Pull the raw credential out of the request, if there is one.
    fn credential(&self, headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        match self.transport {
            AccessTransport::Cookie => Ok(read_cookie(headers, ACCESS_COOKIE_NAME)),
            AccessTransport::Header => {
                let Some(value) = headers.get(AUTHORIZATION) else {
                    return Ok(None);
                };
                let value = value
                    .to_str()
                    .map_err(|_| AuthError::InvalidAuthenticationToken)?;
                if value.is_empty() {
                    return Ok(None);
                }

                let parts: Vec<&str> = value.split(' ').collect();
                match parts.as_slice() {
                    ["Bearer", token] if !token.is_empty() => Ok(Some((*token).to_string())),
                    _ => Err(AuthError::InvalidAuthenticationToken),
                }
            }
        }
    }

    /// Decide who, if anyone, is making the request.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthVerdict {
        let token = match self.credential(headers) {
            Ok(Some(token)) => token,
            Ok(None) => return AuthVerdict::Anonymous,
            Err(err) => return AuthVerdict::Rejected(err),
        };

        let claims = match self.codec.verify(&token) {
            Ok(claims) => claims,
            Err(CodecError::Expired) => {
                if self.revoke_refresh_on_expiry {
                    self.revoke_for_expired(&token).await;
                }
                return AuthVerdict::Rejected(AuthError::ExpiredToken);
            }
            Err(err) => {
                tracing::debug!(error = %err, "Access token rejected");
                return AuthVerdict::Rejected(AuthError::InvalidAuthenticationToken);
            }
        };

        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            tracing::error!(subject = %claims.sub, "Verified access token has a non-UUID subject");
            return AuthVerdict::Rejected(AuthError::ServerError);
        };

        match self.directory.get(user_id).await {
            Ok(user) => AuthVerdict::Authenticated(user),
            Err(DirectoryError::NotFound) => {
                AuthVerdict::Rejected(AuthError::InvalidAuthenticationToken)
            }
            Err(err) => {
                tracing::error!(error = %err, %user_id, "User lookup failed during authentication");
                AuthVerdict::Rejected(AuthError::ServerError)
            }
        }
    }

    async fn revoke_for_expired(&self, token: &str) {
        let Ok(claims) = self.codec.verify_ignoring_expiry(token) else {
            return;
        };
        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            return;
        };
        if let Err(err) = self.store.delete_refresh_credentials_for_user(user_id).await {
            tracing::warn!(error = %err, %user_id, "Failed to revoke refresh credentials");
        }
    }
}

/// Authentication middleware function.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/v1/users/me", get(me))
///     .route_layer(axum::middleware::from_fn_with_state(authenticator, authenticate));
/// ```
pub async fn authenticate(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let verdict = authenticator.authenticate(request.headers()).await;

    let mut response = match verdict {
        AuthVerdict::Rejected(err) => err.into_response(),
        verdict => {
            request.extensions_mut().insert(verdict);
            next.run(request).await
        }
    };

    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    response
}
