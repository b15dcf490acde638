// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints: password and external-identity login, refresh and logout.
//!
//! The refresh credential is only ever set and read through the
//! `REFRESH_TOKEN` cookie. The access credential is returned in the body,
//! or as the `ACCESS_TOKEN` cookie under cookie transport.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    auth::{
        cookies::{
            access_cookie, clear_access_cookie, clear_refresh_cookie, read_cookie, refresh_cookie,
            REFRESH_COOKIE_NAME,
        },
        Auth, AuthError,
    },
    config::AccessTransport,
    directory::{DirectoryError, User},
    error::{ApiError, ApiJson},
    identity::{ExternalIdentity, IdentityError},
    models::{ExternalLoginRequest, LoginRequest, SessionResponse},
    password::verify_password,
    state::AppState,
    tokens::{IssueError, SessionTokens},
};

/// Response headers and body for a freshly issued session.
pub(crate) fn session_response(
    state: &AppState,
    tokens: SessionTokens,
    user: User,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiError> {
    let settings = state.issuer.settings();
    let mut headers = HeaderMap::new();

    headers.append(
        SET_COOKIE,
        refresh_cookie(&tokens.refresh_token, settings.refresh_ttl.num_seconds())
            .map_err(ApiError::server_error)?,
    );

    let access_token = match state.authenticator.transport() {
        AccessTransport::Header => tokens.access_token,
        AccessTransport::Cookie => {
            headers.append(
                SET_COOKIE,
                access_cookie(&tokens.access_token, settings.access_ttl.num_seconds())
                    .map_err(ApiError::server_error)?,
            );
            String::new()
        }
    };

    Ok((
        headers,
        Json(SessionResponse {
            access_token,
            access_token_expires_at: tokens.access_expires_at,
            user: user.into(),
        }),
    ))
}

/// Headers that drop every credential cookie the client may hold.
fn cleared_cookies(transport: AccessTransport) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        clear_refresh_cookie().map_err(ApiError::server_error)?,
    );
    if transport == AccessTransport::Cookie {
        headers.append(SET_COOKIE, clear_access_cookie().map_err(ApiError::server_error)?);
    }
    Ok(headers)
}

/// Exchange email and password for a session.
///
/// The password is checked before the activation state so inactive accounts
/// are not revealed to callers without the password.
#[utoipa::path(
    post,
    path = "/v1/tokens/login",
    request_body = LoginRequest,
    tag = "Tokens",
    responses(
        (status = 200, description = "Session issued; refresh credential set as cookie", body = SessionResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not activated"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiError> {
    let user = match state.directory.get_by_email(&request.email).await {
        Ok(user) => user,
        Err(DirectoryError::NotFound) => return Err(ApiError::invalid_credentials()),
        Err(err) => return Err(err.into()),
    };
    let Some(hash) = user.password_hash.clone() else {
        return Err(ApiError::invalid_credentials());
    };

    let password = request.password;
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(ApiError::server_error)?;
    if !matches {
        tracing::debug!(user_id = %user.id, "Login with wrong password");
        return Err(ApiError::invalid_credentials());
    }
    if !user.activated {
        return Err(ApiError::inactive_account());
    }

    let tokens = state.issuer.issue_session(user.id).await?;
    tracing::info!(user_id = %user.id, "User logged in");
    session_response(&state, tokens, user)
}

/// Exchange an identity provider's access token for a session.
///
/// The first sign-in with a verified email creates an activated account
/// without a password.
#[utoipa::path(
    post,
    path = "/v1/tokens/external",
    request_body = ExternalLoginRequest,
    tag = "Tokens",
    responses(
        (status = 200, description = "Session issued; refresh credential set as cookie", body = SessionResponse),
        (status = 401, description = "Provider rejected the token or has not verified the email"),
        (status = 403, description = "Account not activated"),
    )
)]
pub async fn external_login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ExternalLoginRequest>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiError> {
    if request.access_token.trim().is_empty() {
        return Err(ApiError::unprocessable("access_token", "must be provided"));
    }

    let identity = match state.identity.verify(&request.access_token).await {
        Ok(identity) => identity,
        Err(err @ (IdentityError::Rejected | IdentityError::EmailNotVerified)) => {
            tracing::debug!(error = %err, "External login refused");
            return Err(ApiError::invalid_credentials());
        }
        Err(err) => return Err(ApiError::server_error(err)),
    };

    let user = external_account(&state, &identity).await?;
    if !user.activated {
        return Err(ApiError::inactive_account());
    }

    let tokens = state.issuer.issue_session(user.id).await?;
    tracing::info!(
        user_id = %user.id,
        subject = %identity.subject,
        "User logged in through identity provider"
    );
    session_response(&state, tokens, user)
}

/// The account registered under the identity's email, created on first use.
async fn external_account(
    state: &AppState,
    identity: &ExternalIdentity,
) -> Result<User, ApiError> {
    match state.directory.get_by_email(&identity.email).await {
        Ok(user) => return Ok(user),
        Err(DirectoryError::NotFound) => {}
        Err(err) => return Err(err.into()),
    }

    let local_part = identity
        .email
        .split_once('@')
        .map_or(identity.email.as_str(), |(local, _)| local);
    let mut user = User::external(local_part, identity.email.clone());

    let created = match state.directory.insert(&user).await {
        Ok(created) => created,
        Err(DirectoryError::Duplicate("username")) => {
            let suffix = user.id.simple().to_string();
            user.username = format!("{local_part}-{}", &suffix[..8]);
            state.directory.insert(&user).await?
        }
        // Created by a concurrent sign-in
        Err(DirectoryError::Duplicate("email")) => {
            return Ok(state.directory.get_by_email(&identity.email).await?);
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!(user_id = %created.id, "Created account for external identity");
    Ok(created)
}

/// Rotate the refresh credential from the `REFRESH_TOKEN` cookie.
///
/// An expired credential is deleted and the cookie cleared along with the 403.
#[utoipa::path(
    post,
    path = "/v1/tokens/refresh",
    tag = "Tokens",
    responses(
        (status = 200, description = "Rotated session", body = SessionResponse),
        (status = 401, description = "Missing, invalid or replayed refresh credential"),
        (status = 403, description = "Refresh credential expired"),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<SessionResponse>), Response> {
    let presented = read_cookie(&headers, REFRESH_COOKIE_NAME)
        .ok_or_else(|| reject(AuthError::InvalidAuthenticationToken))?;

    let tokens = match state.issuer.refresh_session(&presented).await {
        Ok(tokens) => tokens,
        Err(IssueError::ExpiredRefreshToken) => {
            let cleared = cleared_cookies(state.authenticator.transport()).map_err(reject)?;
            return Err((cleared, ApiError::from(AuthError::ExpiredToken)).into_response());
        }
        Err(err) => return Err(reject(err)),
    };

    let user = match state.directory.get(tokens.user_id).await {
        Ok(user) => user,
        // Owner deleted since issuance; do not leave the new credential behind
        Err(DirectoryError::NotFound) => {
            state.issuer.logout(tokens.user_id).await.map_err(reject)?;
            return Err(reject(AuthError::InvalidAuthenticationToken));
        }
        Err(err) => return Err(reject(err)),
    };

    session_response(&state, tokens, user).map_err(reject)
}

fn reject(err: impl Into<ApiError>) -> Response {
    err.into().into_response()
}

/// Revoke every refresh credential of the caller and clear the cookies.
#[utoipa::path(
    post,
    path = "/v1/tokens/logout",
    tag = "Tokens",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Invalid or missing authentication token"),
        (status = 403, description = "Access token expired"),
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Auth(user): Auth,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    state.issuer.logout(user.id).await?;
    let headers = cleared_cookies(state.authenticator.transport())?;
    Ok((StatusCode::NO_CONTENT, headers))
}
