// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential generation, signing, persistence and the flows built on them.

pub mod codec;
pub mod issuer;
pub mod secret;
pub mod store;

pub use codec::{CodecError, SessionClaims, TokenCodec};
pub use issuer::{IssueError, SessionTokens, TokenIssuer, TokenSettings};
pub use store::{OneTimeSecret, RefreshCredential, SecretPurpose, StoreError, TokenStore};
