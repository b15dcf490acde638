// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential cookies.
//!
//! The refresh credential only ever travels in an HttpOnly, Secure,
//! SameSite=Strict cookie scoped to the refresh endpoint. The access
//! credential uses a cookie only when the service runs with cookie transport.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

pub const REFRESH_COOKIE_NAME: &str = "REFRESH_TOKEN";
pub const ACCESS_COOKIE_NAME: &str = "ACCESS_TOKEN";

/// Path the refresh cookie is scoped to.
pub const REFRESH_COOKIE_PATH: &str = "/v1/tokens/refresh";

const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

fn build(
    name: &str,
    value: &str,
    path: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={value}; Path={path}; HttpOnly; Secure; SameSite=Strict; Max-Age={max_age}"
    ))
}

fn expired(name: &str, path: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}=; Path={path}; HttpOnly; Secure; SameSite=Strict; Max-Age=0; Expires={EPOCH}"
    ))
}

/// Cookie carrying a refresh credential for `max_age_secs`.
pub fn refresh_cookie(token: &str, max_age_secs: i64) -> Result<HeaderValue, InvalidHeaderValue> {
    build(REFRESH_COOKIE_NAME, token, REFRESH_COOKIE_PATH, max_age_secs)
}

/// Immediately-expired refresh cookie.
pub fn clear_refresh_cookie() -> Result<HeaderValue, InvalidHeaderValue> {
    expired(REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH)
}

/// Cookie carrying an access credential for `max_age_secs`.
pub fn access_cookie(token: &str, max_age_secs: i64) -> Result<HeaderValue, InvalidHeaderValue> {
    build(ACCESS_COOKIE_NAME, token, "/", max_age_secs)
}

pub fn clear_access_cookie() -> Result<HeaderValue, InvalidHeaderValue> {
    expired(ACCESS_COOKIE_NAME, "/")
}

/// Value of the first non-empty cookie called `name` across all `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
        .find(|value| !value.is_empty())
}
