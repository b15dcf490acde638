// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::borrow::Cow;

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::directory::DirectoryError;
use crate::password::PasswordError;
use crate::tokens::IssueError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    field: Option<Cow<'static, str>>,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<Cow<'static, str>>,
}

/// `Json` whose rejection is an [`ApiError`], so malformed bodies get the
/// same error body as every other failure.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            field: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 422 scoped to one request field.
    pub fn unprocessable(
        field: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new(StatusCode::UNPROCESSABLE_ENTITY, "failed_validation", message)
        }
    }

    /// Request field the message refers to.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn invalid_credentials() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "Invalid authentication credentials",
        )
    }

    pub fn inactive_account() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "inactive_account",
            "Your user account must be activated to access this resource",
        )
    }

    pub fn edit_conflict() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "edit_conflict",
            "Unable to update the record due to an edit conflict, please try again",
        )
    }

    /// 500 with a generic message; `err` is logged, never returned.
    pub fn server_error(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "The server encountered a problem and could not process your request",
        )
    }
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        match err {
            // A secret whose owner no longer exists is as good as expired
            IssueError::InvalidSecret | IssueError::UserNotFound => {
                ApiError::unprocessable("token", "invalid or expired token")
            }
            IssueError::InvalidPasscode => ApiError::unprocessable("passcode", "invalid passcode"),
            IssueError::InvalidRefreshToken => AuthError::InvalidAuthenticationToken.into(),
            IssueError::ExpiredRefreshToken => AuthError::ExpiredToken.into(),
            IssueError::EditConflict => ApiError::edit_conflict(),
            other => ApiError::server_error(other),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => {
                ApiError::not_found("the requested resource could not be found")
            }
            DirectoryError::Duplicate(field) => {
                ApiError::unprocessable(field, format!("a user with this {field} already exists"))
            }
            DirectoryError::EditConflict => ApiError::edit_conflict(),
            other => ApiError::server_error(other),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort | PasswordError::TooLong => {
                ApiError::unprocessable("password", err.to_string())
            }
            other => ApiError::server_error(other),
        }
    }
}

/// serde's wording for an absent struct field: "missing field `name`".
fn missing_field(detail: &str) -> Option<String> {
    let rest = detail.split("missing field `").nth(1)?;
    let name = rest.split('`').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let detail = err.body_text();
                match missing_field(&detail) {
                    Some(field) => ApiError::unprocessable(field, "must be provided"),
                    None => Self::new(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "failed_validation",
                        "body contains a value of the wrong type",
                    ),
                }
            }
            JsonRejection::JsonSyntaxError(_) => {
                ApiError::bad_request("body contains badly-formed JSON")
            }
            JsonRejection::MissingJsonContentType(_) => Self::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                "expected a Content-Type of application/json",
            ),
            other => Self::new(other.status(), "bad_request", other.body_text()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::new(err.status_code(), err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            kind: self.kind,
            message: self.message,
            field: self.field,
        });
        (self.status, body).into_response()
    }
}
