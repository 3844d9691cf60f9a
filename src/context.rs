//! Cancellation and deadlines for remote waits.
//!
//! A [`Context`] is threaded through every remote call, retry loop and task
//! poll. It ends either when a [`CancelHandle`] fires or when its deadline
//! passes; every blocking point races its work against [`Context::done`].

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled by its owner.
    #[error("context canceled")]
    Cancelled,
    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation scope for a reconciliation cycle.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Cancellation signal owned by this scope.
    cancel: Option<watch::Receiver<bool>>,
    /// Absolute deadline, already tightened against the parent.
    deadline: Option<Instant>,
    /// Enclosing scope whose cancellation also ends this one.
    parent: Option<Box<Context>>,
}

/// Owner side of a cancellable [`Context`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl Context {
    /// A context that never ends on its own.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child that additionally ends after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child that additionally ends at `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
            parent: self.parent.clone(),
        }
    }

    /// Derives a child that can be cancelled through the returned handle.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let child = Self {
            cancel: Some(rx),
            deadline: self.deadline,
            parent: Some(Box::new(self.clone())),
        };
        (child, CancelHandle { tx })
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(ContextError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(ContextError::DeadlineExceeded);
        }
        self.parent.as_ref().and_then(|p| p.err())
    }

    /// Completes once the context ends.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        // Handle dropped without cancelling.
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        let parent = async {
            match &self.parent {
                Some(parent) => Box::pin(parent.done()).await,
                None => std::future::pending::<ContextError>().await,
            }
        };

        tokio::select! {
            () = cancelled => ContextError::Cancelled,
            () = expired => ContextError::DeadlineExceeded,
            err = parent => err,
        }
    }

    /// Sleeps for `duration`, waking early if the context ends.
    ///
    /// # Errors
    ///
    /// Returns the context error if the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Runs `fut` to completion unless the context ends first.
    ///
    /// # Errors
    ///
    /// Returns the context error if the context ends first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            out = fut => Ok(out),
            err = self.done() => Err(err),
        }
    }
}

impl CancelHandle {
    /// Cancels the associated context and all of its children.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}
