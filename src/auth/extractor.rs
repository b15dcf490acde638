// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the authenticated user.
//!
//! ```rust,ignore
//! async fn me(Auth(user): Auth) -> Json<UserProfile> {
//!     Json(user.into())
//! }
//!
//! async fn is_self(OptionalAuth(user): OptionalAuth, Path(name): Path<String>) -> ... {
//!     // user is None for anonymous requests
//! }
//! ```
//!
//! Both reuse the verdict left by the [`authenticate`](super::authenticate)
//! middleware. On routes without it they authenticate the request themselves.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::{AuthError, AuthVerdict, Authenticator};
use crate::directory::User;

async fn verdict<S>(parts: &mut Parts, state: &S) -> AuthVerdict
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    if let Some(verdict) = parts.extensions.get::<AuthVerdict>().cloned() {
        return verdict;
    }
    let authenticator = Arc::<Authenticator>::from_ref(state);
    authenticator.authenticate(&parts.headers).await
}

/// Extractor that requires an authenticated user.
pub struct Auth(pub User);

impl<S> FromRequestParts<S> for Auth
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match verdict(parts, state).await {
            AuthVerdict::Authenticated(user) => Ok(Auth(user)),
            AuthVerdict::Anonymous => Err(AuthError::InvalidAuthenticationToken),
            AuthVerdict::Rejected(err) => Err(err),
        }
    }
}

/// Extractor that accepts anonymous requests but still rejects bad credentials.
pub struct OptionalAuth(pub Option<User>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match verdict(parts, state).await {
            AuthVerdict::Authenticated(user) => Ok(OptionalAuth(Some(user))),
            AuthVerdict::Anonymous => Ok(OptionalAuth(None)),
            AuthVerdict::Rejected(err) => Err(err),
        }
    }
}
