// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed session credentials (HS256 JWT).
//!
//! A [`TokenCodec`] is bound to one shared secret and to the service identity,
//! which is used both as the `iss` claim and as the single `aud` entry. Access
//! and refresh credentials use two codecs built from distinct secrets, so a
//! leaked access secret cannot mint refresh credentials.
//!
//! ## Verification
//!
//! 1. Signature integrity (malformed input counts as a bad signature)
//! 2. `nbf <= now <= exp`, no clock-skew leeway
//! 3. `iss` equals the service identity
//! 4. `aud` contains the service identity

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by access and refresh credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer (service identity)
    pub iss: String,
    /// Audience (single-element set holding the service identity)
    pub aud: Vec<String>,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Not before (Unix seconds)
    pub nbf: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
    /// Unique token ID; two credentials minted in the same second still differ
    pub jti: String,
}

impl SessionClaims {
    /// Claims for `subject`, valid from `issued_at` for `ttl`.
    pub fn new(subject: Uuid, identity: &str, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.timestamp();
        Self {
            sub: subject.to_string(),
            iss: identity.to_string(),
            aud: vec![identity.to_string()],
            iat,
            nbf: iat,
            exp: (issued_at + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Expiry as a timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Why a credential failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("token signature is invalid or the token is malformed")]
    InvalidSignature,
    #[error("token is expired or not yet valid")]
    Expired,
    #[error("token issuer is invalid")]
    InvalidIssuer,
    #[error("token audience is invalid")]
    InvalidAudience,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for CodecError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => CodecError::Expired,
            ErrorKind::InvalidIssuer => CodecError::InvalidIssuer,
            ErrorKind::InvalidAudience => CodecError::InvalidAudience,
            _ => CodecError::InvalidSignature,
        }
    }
}

/// Signs and verifies session credentials with one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    identity: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Create a codec for `identity` using the HMAC `secret`.
    pub fn new(secret: &[u8], identity: impl Into<String>) -> Self {
        let identity = identity.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[identity.as_str()]);
        validation.set_audience(&[identity.as_str()]);
        validation.set_required_spec_claims(&["sub", "iss", "aud", "nbf", "exp"]);

        Self {
            identity,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// The service identity used for `iss` and `aud`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Build claims for `subject` issued now.
    pub fn claims_for(&self, subject: Uuid, ttl: Duration) -> SessionClaims {
        SessionClaims::new(subject, &self.identity, Utc::now(), ttl)
    }

    /// Sign `claims` into a compact `header.claims.signature` string.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String, CodecError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| CodecError::Signing(e.to_string()))
    }

    /// Verify signature and every claim check.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, CodecError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }

    /// Verify signature, issuer and audience but accept an expired token.
    ///
    /// Used only to identify the owner of a credential that [`verify`](Self::verify)
    /// rejected as [`CodecError::Expired`], for cleanup.
    pub fn verify_ignoring_expiry(&self, token: &str) -> Result<SessionClaims, CodecError> {
        let mut validation = self.validation.clone();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["sub", "iss", "aud"]);
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    const IDENTITY: &str = "https://auth.example.test";

    fn codec() -> TokenCodec {
        TokenCodec::new(b"access-secret-for-tests", IDENTITY)
    }

    fn claims_expiring_in(seconds: i64) -> SessionClaims {
        let now = Utc::now();
        SessionClaims {
            sub: Uuid::new_v4().to_string(),
            iss: IDENTITY.to_string(),
            aud: vec![IDENTITY.to_string()],
            iat: now.timestamp() - 60,
            nbf: now.timestamp() - 60,
            exp: now.timestamp() + seconds,
            jti: Uuid::new_v4().to_string(),
        }
    }

    #[test]
    fn token_has_three_base64url_segments() {
        let token = codec().sign(&claims_expiring_in(60)).unwrap();
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);
        for segment in segments {
            assert!(URL_SAFE_NO_PAD.decode(segment).is_ok());
        }
    }

    #[test]
    fn sign_then_verify_returns_claims() {
        let codec = codec();
        let claims = codec.claims_for(Uuid::new_v4(), Duration::minutes(15));
        let token = codec.sign(&claims).unwrap();
        assert_eq!(codec.verify(&token).unwrap(), claims);
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let token = TokenCodec::new(b"some-other-secret", IDENTITY)
            .sign(&claims_expiring_in(60))
            .unwrap();
        assert_eq!(codec().verify(&token), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn tampered_claims_are_invalid_signature() {
        let codec = codec();
        let token = codec.sign(&claims_expiring_in(60)).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();

        let mut forged = claims_expiring_in(60);
        forged.sub = Uuid::new_v4().to_string();
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert_eq!(codec.verify(&parts.join(".")), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn garbage_is_invalid_signature() {
        assert_eq!(codec().verify("not-a-token"), Err(CodecError::InvalidSignature));
        assert_eq!(codec().verify("a.b.c"), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn expired_one_second_ago_is_rejected() {
        let codec = codec();
        let token = codec.sign(&claims_expiring_in(-1)).unwrap();
        assert_eq!(codec.verify(&token), Err(CodecError::Expired));
    }

    #[test]
    fn expiring_in_one_second_is_accepted() {
        let codec = codec();
        let token = codec.sign(&claims_expiring_in(1)).unwrap();
        assert!(codec.verify(&token).is_ok());
    }

    #[test]
    fn not_yet_valid_is_expired() {
        let codec = codec();
        let mut claims = claims_expiring_in(600);
        claims.nbf = Utc::now().timestamp() + 300;
        let token = codec.sign(&claims).unwrap();
        assert_eq!(codec.verify(&token), Err(CodecError::Expired));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let codec = codec();
        let mut claims = claims_expiring_in(60);
        claims.iss = "https://elsewhere.example.test".to_string();
        let token = codec.sign(&claims).unwrap();
        assert_eq!(codec.verify(&token), Err(CodecError::InvalidIssuer));
    }

    #[test]
    fn foreign_audience_is_rejected() {
        let codec = codec();
        let mut claims = claims_expiring_in(60);
        claims.aud = vec!["https://elsewhere.example.test".to_string()];
        let token = codec.sign(&claims).unwrap();
        assert_eq!(codec.verify(&token), Err(CodecError::InvalidAudience));
    }

    #[test]
    fn ignoring_expiry_still_checks_signature() {
        let codec = codec();
        let expired = codec.sign(&claims_expiring_in(-3600)).unwrap();
        assert!(codec.verify_ignoring_expiry(&expired).is_ok());

        let forged = TokenCodec::new(b"some-other-secret", IDENTITY)
            .sign(&claims_expiring_in(-3600))
            .unwrap();
        assert_eq!(
            codec.verify_ignoring_expiry(&forged),
            Err(CodecError::InvalidSignature)
        );
    }

    #[test]
    fn claims_carry_identity_as_issuer_and_audience() {
        let claims = codec().claims_for(Uuid::new_v4(), Duration::minutes(5));
        assert_eq!(claims.iss, IDENTITY);
        assert_eq!(claims.aud, vec![IDENTITY.to_string()]);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp - claims.iat, 300);
    }
}
