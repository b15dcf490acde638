// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Request-time handling of the access credential issued by this service.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <access token>` (or the
//!    `ACCESS_TOKEN` cookie when cookie transport is configured)
//! 2. The middleware verifies signature, expiry, issuer and audience with the
//!    access secret
//! 3. `sub` is looked up in the user directory
//! 4. Handlers read the outcome through [`Auth`] or [`OptionalAuth`]
//!
//! ## Security
//!
//! - No clock-skew leeway
//! - Refresh credentials never travel in headers; they live in an HttpOnly
//!   cookie scoped to the refresh endpoint
//! - Responses that depend on the credential carry `Vary: Authorization`

pub mod cookies;
pub mod error;
pub mod extractor;
pub mod middleware;

pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use middleware::{authenticate, AuthVerdict, Authenticator};
