// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! This module defines the request and response data structures used by
//! the REST API. All types derive `ToSchema` for OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Users**: signup, activation, profile, availability checks
//! - **Sessions**: password and external-identity login, refresh
//! - **Password reset**: forgot, reset

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::directory::User;

// =============================================================================
// User Models
// =============================================================================

/// Request to create an account.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    /// 8 to 72 bytes.
    pub password: String,
}

/// Returned after signup. The passcode is only sent out of band.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignupResponse {
    pub user: UserProfile,
    /// Activation token (26 characters).
    pub activation_token: String,
}

/// Second activation factor.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ActivateRequest {
    /// 6-digit passcode from the activation email.
    pub passcode: String,
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub activated: bool,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            created_at: user.created_at,
            username: user.username,
            activated: user.activated,
        }
    }
}

/// Query for `/v1/users/check`. Exactly one field must be set.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct AvailabilityQuery {
    pub email: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AvailabilityResponse {
    /// Whether an account already uses the value.
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IsSelfResponse {
    pub is_self: bool,
}

// =============================================================================
// Session Models
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Sign-in through an external identity provider.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExternalLoginRequest {
    /// Access token issued to the client by the identity provider.
    pub access_token: String,
}

/// A fresh access credential. The refresh credential travels in a cookie.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Empty when the access credential is delivered as a cookie.
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

// =============================================================================
// Password Reset Models
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
