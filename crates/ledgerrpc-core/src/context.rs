//! Per-call cancellation and deadline.
//!
//! A [`CallContext`] is cheap to clone; clones share the same cancellation
//! token, so cancelling any clone cancels every call using it. Dropping a
//! call's future also cancels it, the context only adds an explicit handle
//! and an absolute deadline.

use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

/// Cancellation handle plus optional deadline for one or more calls.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_in(timeout)
    }

    /// A context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set (or tighten) the deadline to `timeout` from now.
    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// A child context: cancelled with its parent, cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every call sharing this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The context's error if it is already finished, `None` otherwise.
    pub fn err(&self) -> Option<RpcError> {
        if self.token.is_cancelled() {
            return Some(RpcError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RpcError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes,
    /// yielding the matching error. Pending forever for a background context.
    pub async fn done(&self) -> RpcError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => RpcError::Cancelled,
                _ = time::sleep_until(deadline) => RpcError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                RpcError::Cancelled
            }
        }
    }
}
