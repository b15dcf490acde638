// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth Token Service - Credential Lifecycle for User Accounts
//!
//! Issues and consumes one-time activation and password-reset secrets, mints
//! and rotates signed access/refresh session credentials, and authenticates
//! inbound HTTP requests.
//!
//! ## Modules
//!
//! - `tokens` - Secret generation, signing codec, store contract and issuance flows
//! - `auth` - Request authentication middleware, extractors and cookies
//! - `storage` - Embedded redb implementations of the token store and user directory
//! - `identity` - External identity provider verification for OAuth login
//! - `tasks` - Supervised background work with a bounded shutdown drain
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod models;
pub mod notify;
pub mod password;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod telemetry;
pub mod tokens;
