//! Per-call deadline and cancellation.
//!
//! Every [`KeyStore`](crate::KeyStore) operation receives a [`CallContext`].
//! Backends run their database futures through [`CallContext::run`], which
//! drops the in-flight future as soon as the caller's token is cancelled or
//! the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::StoreError;

/// Deadline and cancellation signal for a single store call.
///
/// Cloning a context shares its cancellation token. A context without a
/// deadline and without a cancelled token never aborts the call.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use keystore_backend::CallContext;
/// let ctx = CallContext::with_timeout(Duration::from_secs(5));
/// assert!(ctx.deadline().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// A context with no deadline and a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// A context driven by an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// Derive a child context.
    ///
    /// The child is cancelled whenever this context is, and expires at the
    /// earlier of this context's deadline and `timeout` from now (if given).
    /// Cancelling the child does not affect the parent.
    #[must_use]
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `fut` to completion unless the context fires first.
    ///
    /// Cancellation is checked before the deadline, and both before the
    /// future itself, so an already-expired context never starts the call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cancelled`] if the token is cancelled or the
    /// deadline passes before `fut` completes, otherwise whatever `fut`
    /// returns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StoreError::Cancelled {
                reason: "cancelled by caller".to_owned(),
            }),
            () = deadline => Err(StoreError::Cancelled {
                reason: "deadline exceeded".to_owned(),
            }),
            result = fut => result,
        }
    }
}
