// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Out-of-band delivery of activation and reset secrets.

use async_trait::async_trait;

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Sends secrets to users over a channel they control.
///
/// Calls are always made from the background task runner, never inline with
/// the request that produced the secret.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_activation(
        &self,
        recipient: &Recipient,
        token: &str,
        passcode: &str,
    ) -> Result<(), NotifyError>;

    async fn send_password_reset(&self, recipient: &Recipient, link: &str)
        -> Result<(), NotifyError>;
}

/// Notifier that only records a structured log event.
///
/// The secrets themselves are not logged.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_activation(
        &self,
        recipient: &Recipient,
        _token: &str,
        _passcode: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            email = %recipient.email,
            username = %recipient.username,
            "Activation email queued"
        );
        Ok(())
    }

    async fn send_password_reset(
        &self,
        recipient: &Recipient,
        _link: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            email = %recipient.email,
            username = %recipient.username,
            "Password reset email queued"
        );
        Ok(())
    }
}
