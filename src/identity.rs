// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External identity verification.
//!
//! A client that signed in with an OAuth provider hands us the provider's
//! access token. [`IdentityVerifier`] turns that token into a verified email
//! address; the login handler then finds or creates the matching user and
//! issues a session like any other login.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

/// OpenID Connect userinfo endpoint used when none is configured.
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A user as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Provider-stable subject identifier
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider did not accept the token.
    #[error("identity provider rejected the token")]
    Rejected,

    #[error("identity provider has not verified the email address")]
    EmailNotVerified,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Exchanges a provider access token for a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, access_token: &str) -> Result<ExternalIdentity, IdentityError>;
}

/// Verifier backed by an OpenID Connect userinfo endpoint.
#[derive(Clone)]
pub struct UserInfoVerifier {
    endpoint: Url,
    client: reqwest::Client,
}

impl UserInfoVerifier {
    pub fn new(endpoint: Url) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        Ok(Self { endpoint, client })
    }
}

/// Userinfo response fields we read.
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
}

impl TryFrom<UserInfo> for ExternalIdentity {
    type Error = IdentityError;

    fn try_from(info: UserInfo) -> Result<Self, Self::Error> {
        let email = info
            .email
            .filter(|email| !email.is_empty())
            .ok_or(IdentityError::EmailNotVerified)?;
        if !info.email_verified {
            return Err(IdentityError::EmailNotVerified);
        }
        Ok(Self {
            subject: info.sub,
            email,
            name: info.name.filter(|name| !name.trim().is_empty()),
        })
    }
}

#[async_trait]
impl IdentityVerifier for UserInfoVerifier {
    async fn verify(&self, access_token: &str) -> Result<ExternalIdentity, IdentityError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(IdentityError::Rejected);
        }
        if !status.is_success() {
            return Err(IdentityError::Unavailable(format!(
                "HTTP {status} from userinfo endpoint"
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        info.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Result<ExternalIdentity, IdentityError> {
        serde_json::from_value::<UserInfo>(json).unwrap().try_into()
    }

    #[test]
    fn verified_email_becomes_an_identity() {
        let identity = parse(serde_json::json!({
            "sub": "110169484474386276334",
            "email": "alice@example.com",
            "email_verified": true,
            "name": "Alice"
        }))
        .unwrap();
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.subject, "110169484474386276334");
        assert_eq!(identity.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn unverified_or_missing_email_is_refused() {
        assert!(matches!(
            parse(serde_json::json!({
                "sub": "1",
                "email": "bob@example.com",
                "email_verified": false
            })),
            Err(IdentityError::EmailNotVerified)
        ));
        assert!(matches!(
            parse(serde_json::json!({"sub": "1", "email_verified": true})),
            Err(IdentityError::EmailNotVerified)
        ));
    }

    #[test]
    fn verifier_builds_for_default_endpoint() {
        let endpoint = Url::parse(GOOGLE_USERINFO_URL).unwrap();
        assert!(UserInfoVerifier::new(endpoint).is_ok());
    }
}
