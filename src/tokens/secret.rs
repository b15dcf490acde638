// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Opaque one-time secrets and numeric passcodes.
//!
//! ## Formats
//!
//! - Opaque secret: 16 bytes from the OS CSPRNG, base-32 (RFC 4648) without
//!   padding, always 26 characters. Only its SHA-256 digest is persisted.
//! - Passcode: 6 decimal digits. Digits are drawn by rejection sampling
//!   (bytes >= 250 are discarded) so every digit is exactly uniform.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes behind an opaque secret.
pub const OPAQUE_SECRET_BYTES: usize = 16;

/// Length of the base-32 plaintext of an opaque secret.
pub const OPAQUE_SECRET_LEN: usize = 26;

/// Length of a numeric passcode.
pub const PASSCODE_LEN: usize = 6;

/// Largest multiple of 10 that fits in a byte; bytes at or above it are redrawn.
const PASSCODE_BYTE_LIMIT: u8 = 250;

/// SHA-256 digest of an opaque secret's plaintext.
pub type SecretHash = [u8; 32];

/// The OS entropy source failed.
#[derive(Debug, thiserror::Error)]
#[error("entropy source failure: {0}")]
pub struct EntropyError(#[from] rand::Error);

/// Freshly generated opaque secret.
///
/// The plaintext is handed to the caller exactly once; only `hash` is stored.
#[derive(Clone, PartialEq, Eq)]
pub struct OpaqueSecret {
    pub plaintext: String,
    pub hash: SecretHash,
}

impl std::fmt::Debug for OpaqueSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpaqueSecret")
            .field("plaintext", &"<redacted>")
            .field("hash", &hex_prefix(&self.hash))
            .finish()
    }
}

/// Generate a new opaque secret and its digest.
pub fn new_opaque_secret() -> Result<OpaqueSecret, EntropyError> {
    let mut bytes = [0u8; OPAQUE_SECRET_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;

    let plaintext = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes);
    let hash = hash_secret(&plaintext);

    Ok(OpaqueSecret { plaintext, hash })
}

/// Generate a 6-digit numeric passcode.
pub fn new_passcode() -> Result<String, EntropyError> {
    let mut passcode = String::with_capacity(PASSCODE_LEN);
    let mut buffer = [0u8; PASSCODE_LEN];

    while passcode.len() < PASSCODE_LEN {
        OsRng.try_fill_bytes(&mut buffer)?;
        for byte in buffer {
            if byte >= PASSCODE_BYTE_LIMIT {
                continue;
            }
            passcode.push(char::from(b'0' + byte % 10));
            if passcode.len() == PASSCODE_LEN {
                break;
            }
        }
    }

    Ok(passcode)
}

/// Digest a plaintext secret the way it is keyed in the token store.
pub fn hash_secret(plaintext: &str) -> SecretHash {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Short hex rendering of a digest for log lines.
pub fn hex_prefix(hash: &SecretHash) -> String {
    hash.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
