// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints: signup, activation, password reset and profile lookups.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::{
    api::tokens::session_response,
    auth::{Auth, OptionalAuth},
    directory::{DirectoryError, User},
    error::{ApiError, ApiJson},
    models::{
        ActivateRequest, AvailabilityQuery, AvailabilityResponse, ForgotPasswordRequest,
        IsSelfResponse, MessageResponse, ResetPasswordRequest, SessionResponse, SignupRequest,
        SignupResponse, UserProfile,
    },
    notify::Recipient,
    password::{hash_password, validate_password},
    state::AppState,
    tokens::{
        secret::{OPAQUE_SECRET_LEN, PASSCODE_LEN},
        SecretPurpose,
    },
};

const MAX_USERNAME_BYTES: usize = 500;

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.trim().is_empty() {
        return Err(ApiError::unprocessable("username", "must be provided"));
    }
    if username.len() > MAX_USERNAME_BYTES {
        return Err(ApiError::unprocessable(
            "username",
            format!("must not be more than {MAX_USERNAME_BYTES} bytes long"),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::unprocessable("email", "must be a valid email address"));
    }
    Ok(())
}

fn validate_token(token: &str) -> Result<(), ApiError> {
    if token.len() != OPAQUE_SECRET_LEN {
        return Err(ApiError::unprocessable(
            "token",
            format!("must be {OPAQUE_SECRET_LEN} bytes long"),
        ));
    }
    Ok(())
}

async fn hash_in_background(password: String) -> Result<String, ApiError> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(ApiError::server_error)??;
    Ok(hash)
}

fn recipient(user: &User) -> Recipient {
    Recipient {
        email: user.email.clone(),
        username: user.username.clone(),
    }
}

/// Create an account and send its activation secret.
///
/// An unactivated account holding the same email is replaced, together with
/// its outstanding activation secrets.
#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = SignupRequest,
    tag = "Users",
    responses(
        (status = 201, description = "Account created; passcode sent out of band", body = SignupResponse),
        (status = 422, description = "Validation failed or email/username taken"),
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    validate_username(&request.username)?;
    validate_email(&request.email)?;
    validate_password(&request.password)?;

    match state.directory.get_by_email(&request.email).await {
        Ok(existing) if !existing.activated => {
            state
                .store
                .delete_one_time_secrets_for_user(existing.id, SecretPurpose::Activation)
                .await
                .map_err(ApiError::server_error)?;
            state.directory.delete(existing.id).await?;
            tracing::info!(user_id = %existing.id, "Replaced unactivated account");
        }
        Ok(_) => return Err(DirectoryError::Duplicate("email").into()),
        Err(DirectoryError::NotFound) => {}
        Err(err) => return Err(err.into()),
    }

    let password_hash = hash_in_background(request.password).await?;
    let user = state
        .directory
        .insert(&User::new(request.username, request.email, password_hash))
        .await?;

    let secret = state.issuer.issue_activation(user.id).await?;

    let notifier = state.notifier.clone();
    let to = recipient(&user);
    let token = secret.plaintext.clone();
    let passcode = secret.passcode.clone().unwrap_or_default();
    state.tasks.spawn("send_activation", async move {
        if let Err(err) = notifier.send_activation(&to, &token, &passcode).await {
            tracing::error!(error = %err, email = %to.email, "Activation email failed");
        }
    });

    tracing::info!(user_id = %user.id, "User signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: user.into(),
            activation_token: secret.plaintext,
        }),
    ))
}

/// Consume an activation secret with its passcode and start a session.
#[utoipa::path(
    put,
    path = "/v1/users/activate/{token}",
    params(("token" = String, Path, description = "Activation token (26 characters)")),
    request_body = ActivateRequest,
    tag = "Users",
    responses(
        (status = 200, description = "Activated; session issued", body = SessionResponse),
        (status = 409, description = "Edit conflict; request a new activation email"),
        (status = 422, description = "Invalid or expired token, or wrong passcode"),
    )
)]
pub async fn activate(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ApiJson(request): ApiJson<ActivateRequest>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiError> {
    validate_token(&token)?;
    if request.passcode.len() != PASSCODE_LEN {
        return Err(ApiError::unprocessable(
            "passcode",
            format!("must be {PASSCODE_LEN} bytes long"),
        ));
    }

    let user = state.issuer.activate(&token, &request.passcode).await?;
    let tokens = state.issuer.issue_session(user.id).await?;
    session_response(&state, tokens, user)
}

#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Authenticated user", body = UserProfile),
        (status = 401, description = "Invalid or missing authentication token"),
        (status = 403, description = "Access token expired"),
    )
)]
pub async fn me(Auth(user): Auth) -> Json<UserProfile> {
    Json(user.into())
}

/// Whether the caller is the user called `username`. Anonymous callers never are.
#[utoipa::path(
    get,
    path = "/v1/users/{username}/is-self",
    params(("username" = String, Path, description = "Username to compare against")),
    tag = "Users",
    security((), ("bearer" = [])),
    responses(
        (status = 200, body = IsSelfResponse),
        (status = 401, description = "Invalid authentication token"),
    )
)]
pub async fn is_self(
    OptionalAuth(user): OptionalAuth,
    Path(username): Path<String>,
) -> Json<IsSelfResponse> {
    Json(IsSelfResponse {
        is_self: user.is_some_and(|user| user.username == username),
    })
}

/// Whether an email or username is already taken. Exactly one must be given.
#[utoipa::path(
    get,
    path = "/v1/users/check",
    params(AvailabilityQuery),
    tag = "Users",
    responses(
        (status = 200, body = AvailabilityResponse),
        (status = 422, description = "Neither or both query parameters given"),
    )
)]
pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let lookup = match (query.email.as_deref(), query.username.as_deref()) {
        (Some(email), None) => state.directory.get_by_email(email).await,
        (None, Some(username)) => state.directory.get_by_username(username).await,
        _ => {
            return Err(ApiError::unprocessable(
                "query",
                "exactly one of email or username must be provided",
            ))
        }
    };

    let exists = match lookup {
        Ok(_) => true,
        Err(DirectoryError::NotFound) => false,
        Err(err) => return Err(err.into()),
    };
    Ok(Json(AvailabilityResponse { exists }))
}

/// Email a password-reset link to an activated account.
#[utoipa::path(
    post,
    path = "/v1/users/password/forgot",
    request_body = ForgotPasswordRequest,
    tag = "Users",
    responses(
        (status = 201, description = "Reset link sent", body = MessageResponse),
        (status = 403, description = "Account not activated"),
        (status = 404, description = "No account with that email"),
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    validate_email(&request.email)?;

    let user = match state.directory.get_by_email(&request.email).await {
        Ok(user) => user,
        Err(DirectoryError::NotFound) => {
            return Err(ApiError::not_found("no matching email address found"))
        }
        Err(err) => return Err(err.into()),
    };
    if !user.activated {
        return Err(ApiError::inactive_account());
    }

    let secret = state.issuer.issue_reset(user.id).await?;
    let link = format!(
        "{}/reset-forgot-password/{}",
        state.frontend_url.as_str().trim_end_matches('/'),
        secret.plaintext
    );

    let notifier = state.notifier.clone();
    let to = recipient(&user);
    state.tasks.spawn("send_password_reset", async move {
        if let Err(err) = notifier.send_password_reset(&to, &link).await {
            tracing::error!(error = %err, email = %to.email, "Password reset email failed");
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "an email will be sent to you containing password reset instructions",
        )),
    ))
}

/// Consume a reset secret and set a new password.
///
/// Refresh credentials issued under the old password are revoked.
#[utoipa::path(
    put,
    path = "/v1/users/password/reset/{token}",
    params(("token" = String, Path, description = "Reset token (26 characters)")),
    request_body = ResetPasswordRequest,
    tag = "Users",
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 409, description = "Edit conflict; request a new reset link"),
        (status = 422, description = "Invalid or expired token, or unacceptable password"),
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_token(&token)?;
    validate_password(&request.password)?;

    // Unknown tokens are turned away before any hashing work
    state.issuer.check_reset(&token).await?;
    let password_hash = hash_in_background(request.password).await?;
    let user = state.issuer.reset_password(&token, password_hash).await?;
    state.issuer.logout(user.id).await?;

    Ok(Json(MessageResponse::new("your password was successfully reset")))
}
