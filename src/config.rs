// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed [`ServerConfig`] built
//! from them once at startup. Nothing below `main` reads the environment; the
//! token core receives [`TokenSettings`] by value.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `auth.redb` | `./data` |
//! | `SERVICE_IDENTITY` | Issuer and audience of signed credentials | `http://localhost:8080` |
//! | `ACCESS_TOKEN_SECRET` | HMAC secret for access credentials | Required |
//! | `ACCESS_TOKEN_TTL_SECS` | Access credential lifetime, at most ten years like every TTL | `900` |
//! | `REFRESH_TOKEN_SECRET` | HMAC secret for refresh credentials, distinct from the access secret | Required |
//! | `REFRESH_TOKEN_TTL_SECS` | Refresh credential lifetime | `604800` |
//! | `ACTIVATION_TOKEN_TTL_SECS` | Activation secret lifetime | `86400` |
//! | `RESET_TOKEN_TTL_SECS` | Password-reset secret lifetime | `86400` |
//! | `STORE_TIMEOUT_MS` | Bound on every store call | `3000` |
//! | `SHUTDOWN_GRACE_SECS` | Background task drain period on shutdown | `20` |
//! | `ACCESS_TOKEN_TRANSPORT` | `header` (Bearer) or `cookie` | `header` |
//! | `REVOKE_REFRESH_ON_ACCESS_EXPIRY` | Drop refresh credentials when an expired access credential is presented | `false` |
//! | `FRONTEND_URL` | Base URL for password-reset links | `http://localhost:3000` |
//! | `OAUTH_USERINFO_URL` | Userinfo endpoint for external-identity login | Google's OpenID Connect endpoint |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::identity::GOOGLE_USERINFO_URL;
use crate::tokens::TokenSettings;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const SERVICE_IDENTITY_ENV: &str = "SERVICE_IDENTITY";
pub const ACCESS_TOKEN_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
pub const ACCESS_TOKEN_TTL_ENV: &str = "ACCESS_TOKEN_TTL_SECS";
pub const REFRESH_TOKEN_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";
pub const REFRESH_TOKEN_TTL_ENV: &str = "REFRESH_TOKEN_TTL_SECS";
pub const ACTIVATION_TOKEN_TTL_ENV: &str = "ACTIVATION_TOKEN_TTL_SECS";
pub const RESET_TOKEN_TTL_ENV: &str = "RESET_TOKEN_TTL_SECS";
pub const STORE_TIMEOUT_ENV: &str = "STORE_TIMEOUT_MS";
pub const SHUTDOWN_GRACE_ENV: &str = "SHUTDOWN_GRACE_SECS";
pub const ACCESS_TOKEN_TRANSPORT_ENV: &str = "ACCESS_TOKEN_TRANSPORT";
pub const REVOKE_REFRESH_ON_ACCESS_EXPIRY_ENV: &str = "REVOKE_REFRESH_ON_ACCESS_EXPIRY";
pub const FRONTEND_URL_ENV: &str = "FRONTEND_URL";
pub const OAUTH_USERINFO_URL_ENV: &str = "OAUTH_USERINFO_URL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const RUST_LOG_DEFAULT: &str = "info,tower_http=debug";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_IDENTITY: &str = "http://localhost:8080";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_ONE_TIME_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 20;
/// Upper bound on every TTL; keeps expiry arithmetic far from overflow.
const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ")]
    SharedSecret,
}

/// Where the access credential travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessTransport {
    /// `Authorization: Bearer <token>`
    #[default]
    Header,
    /// HttpOnly `ACCESS_TOKEN` cookie
    Cookie,
}

impl FromStr for AccessTransport {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "header" | "bearer" => Ok(AccessTransport::Header),
            "cookie" => Ok(AccessTransport::Cookie),
            other => Err(format!("expected `header` or `cookie`, got `{other}`")),
        }
    }
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store_timeout: Duration,
    pub shutdown_grace: Duration,
    pub frontend_url: Url,
    pub userinfo_url: Url,
    pub transport: AccessTransport,
    pub revoke_refresh_on_access_expiry: bool,
    pub tokens: TokenSettings,
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let access_secret =
            var(ACCESS_TOKEN_SECRET_ENV).ok_or(ConfigError::Missing(ACCESS_TOKEN_SECRET_ENV))?;
        let refresh_secret =
            var(REFRESH_TOKEN_SECRET_ENV).ok_or(ConfigError::Missing(REFRESH_TOKEN_SECRET_ENV))?;
        if access_secret == refresh_secret {
            return Err(ConfigError::SharedSecret);
        }

        let identity = var(SERVICE_IDENTITY_ENV).unwrap_or_else(|| DEFAULT_IDENTITY.to_string());

        let frontend_url = url_var(&var, FRONTEND_URL_ENV, DEFAULT_FRONTEND_URL)?;

        let userinfo_url = url_var(&var, OAUTH_USERINFO_URL_ENV, GOOGLE_USERINFO_URL)?;

        let tokens = TokenSettings {
            identity,
            access_secret: access_secret.into_bytes(),
            refresh_secret: refresh_secret.into_bytes(),
            access_ttl: ttl(&var, ACCESS_TOKEN_TTL_ENV, DEFAULT_ACCESS_TTL_SECS)?,
            refresh_ttl: ttl(&var, REFRESH_TOKEN_TTL_ENV, DEFAULT_REFRESH_TTL_SECS)?,
            activation_ttl: ttl(&var, ACTIVATION_TOKEN_TTL_ENV, DEFAULT_ONE_TIME_TTL_SECS)?,
            reset_ttl: ttl(&var, RESET_TOKEN_TTL_ENV, DEFAULT_ONE_TIME_TTL_SECS)?,
        };

        Ok(Self {
            host: var(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parsed(&var, PORT_ENV, DEFAULT_PORT)?,
            data_dir: var(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            store_timeout: Duration::from_millis(parsed(
                &var,
                STORE_TIMEOUT_ENV,
                DEFAULT_STORE_TIMEOUT_MS,
            )?),
            shutdown_grace: Duration::from_secs(parsed(
                &var,
                SHUTDOWN_GRACE_ENV,
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
            frontend_url,
            userinfo_url,
            transport: parsed(&var, ACCESS_TOKEN_TRANSPORT_ENV, AccessTransport::Header)?,
            revoke_refresh_on_access_expiry: parsed(
                &var,
                REVOKE_REFRESH_ON_ACCESS_EXPIRY_ENV,
                false,
            )?,
            tokens,
        })
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn url_var<V>(var: &V, name: &'static str, default: &str) -> Result<Url, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    let raw = var(name).unwrap_or_else(|| default.to_string());
    Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn ttl<V>(var: &V, name: &'static str, default_secs: i64) -> Result<chrono::Duration, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    let secs: i64 = parsed(var, name, default_secs)?;
    if secs <= 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    if secs > MAX_TTL_SECS {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must not exceed {MAX_TTL_SECS} seconds"),
        });
    }
    Ok(chrono::Duration::seconds(secs))
}
