// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Task Runner
//!
//! Supervises fire-and-forget side effects such as notification delivery.
//!
//! - Each task runs on its own tokio task, so a panic unwinds only that task.
//!   The panic is logged and never reaches the request that scheduled it.
//! - Every task is tracked. On shutdown the runner stops waiting for new work
//!   and drains what is in flight, bounded by a grace period.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Clone, Default)]
pub struct BackgroundTaskRunner {
    tracker: TaskTracker,
}

impl BackgroundTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background under `name`.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);

        self.tracker.spawn(async move {
            match handle.await {
                Ok(()) => debug!(task = name, "Background task finished"),
                Err(err) if err.is_panic() => {
                    let message = panic_message(err.into_panic());
                    error!(task = name, panic = %message, "Background task panicked");
                }
                Err(err) => warn!(task = name, error = %err, "Background task cancelled"),
            }
        });
    }

    /// Number of tasks not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for in-flight tasks, at most `grace`.
    ///
    /// Returns `false` if tasks were still running when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, ?grace, "Draining background tasks");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "Background tasks still running after grace period"
                );
                false
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn panicking_task_does_not_take_down_the_runner() {
        let runner = BackgroundTaskRunner::new();
        let done = Arc::new(AtomicUsize::new(0));

        runner.spawn("boom", async { panic!("delivery failed") });
        let counter = done.clone();
        runner.spawn("ok", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(runner.shutdown(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_tasks() {
        let runner = BackgroundTaskRunner::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = done.clone();
            runner.spawn("slow", async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(runner.in_flight() > 0);

        assert!(runner.shutdown(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_grace() {
        let runner = BackgroundTaskRunner::new();
        runner.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        assert!(!runner.shutdown(Duration::from_millis(20)).await);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
