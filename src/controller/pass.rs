//! Per-pass cancellation context
//!
//! A pass may be bounded by a deadline and interrupted by a shutdown signal.
//! Reconcilers call [`PassContext::check`] before every store mutation;
//! mutations already issued are not rolled back.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct PassContext {
    deadline: Option<Instant>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PassContext {
    /// A context that is never cancelled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancel once the sender publishes `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn cancel_reason(&self) -> Option<&'static str> {
        if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some("shutdown requested");
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some("deadline exceeded");
        }
        None
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Fail with [`Error::Cancelled`] if the pass must stop before `step`
    pub fn check(&self, step: &str) -> Result<()> {
        match self.cancel_reason() {
            Some(reason) => Err(Error::Cancelled(format!("{reason} before {step}"))),
            None => Ok(()),
        }
    }

    /// Sleep for `delay`, returning early with an error if cancelled meanwhile
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let wait_shutdown = async {
            match shutdown.as_mut() {
                Some(rx) => {
                    while !*rx.borrow_and_update() {
                        if rx.changed().await.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_shutdown => {}
        }
        self.check("retry")
    }
}
