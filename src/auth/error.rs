// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Why a request carrying a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing, malformed, forged, or pointing at an unknown user
    InvalidAuthenticationToken,
    /// Signed by us but past its expiry
    ExpiredToken,
    /// The user directory or token store could not be reached
    ServerError,
}

#[derive(Serialize)]
struct AuthErrorBody {
    kind: &'static str,
    message: String,
}

impl AuthError {
    /// Machine-readable kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidAuthenticationToken => "invalid_authentication_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::ServerError => "server_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidAuthenticationToken => StatusCode::UNAUTHORIZED,
            AuthError::ExpiredToken => StatusCode::FORBIDDEN,
            AuthError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidAuthenticationToken => {
                write!(f, "Invalid or missing authentication token")
            }
            AuthError::ExpiredToken => write!(f, "Your token has expired"),
            AuthError::ServerError => {
                write!(f, "The server encountered a problem and could not process your request")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let response = AuthError::InvalidAuthenticationToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["kind"], "invalid_authentication_token");
        assert_eq!(body["message"], "Invalid or missing authentication token");
    }

    #[tokio::test]
    async fn expired_token_returns_403() {
        let response = AuthError::ExpiredToken.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn server_error_hides_details() {
        assert_eq!(
            AuthError::ServerError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(!AuthError::ServerError.to_string().contains("redb"));
    }
}
