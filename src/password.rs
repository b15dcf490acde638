// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password hashing with Argon2id (PHC string format).

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;

/// Shortest accepted password, in bytes.
pub const MIN_PASSWORD_BYTES: usize = 8;

/// Longest accepted password, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password must be at least {MIN_PASSWORD_BYTES} bytes long")]
    TooShort,

    #[error("password must not be more than {MAX_PASSWORD_BYTES} bytes long")]
    TooLong,

    #[error("entropy source failure: {0}")]
    Entropy(#[from] rand::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Reject passwords outside the accepted length range.
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    match password.len() {
        n if n < MIN_PASSWORD_BYTES => Err(PasswordError::TooShort),
        n if n > MAX_PASSWORD_BYTES => Err(PasswordError::TooLong),
        _ => Ok(()),
    }
}

/// Validate and hash a password.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    validate_password(password)?;

    let mut salt = [0u8; 16];
    OsRng.try_fill_bytes(&mut salt)?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| PasswordError::Hash(e.to_string()))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Whether `password` matches the stored PHC `hash`.
///
/// A malformed stored hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse battery", &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("pa55word!").unwrap();
        let b = hash_password("pa55word!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn length_limits() {
        assert!(matches!(validate_password("short"), Err(PasswordError::TooShort)));
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password(&"x".repeat(72)).is_ok());
        assert!(matches!(
            validate_password(&"x".repeat(73)),
            Err(PasswordError::TooLong)
        ));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
