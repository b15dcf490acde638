// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LOG_FORMAT_ENV, RUST_LOG_DEFAULT};

/// Install the global subscriber.
///
/// `RUST_LOG` selects the filter; `LOG_FORMAT=json` selects JSON lines,
/// anything else the human-readable format. Calling this twice is harmless.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(RUST_LOG_DEFAULT));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.with_target(false).json().try_init()
    } else {
        builder.pretty().try_init()
    };
}
