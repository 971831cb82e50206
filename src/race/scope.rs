//! Cancellation scopes shared by every task of a race
//!
//! A scope is a cheap, clonable handle. Cancelling a scope cancels every scope
//! derived from it, never its parent. Cancellation is advisory: tasks observe
//! it at their own check-points through [`CancellationScope::is_cancelled`] or
//! by awaiting [`CancellationScope::cancelled`].

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why a scope was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// `cancel()` was called on the scope or one of its ancestors
    Requested,
    /// The scope's deadline elapsed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "cancellation requested"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

struct Inner {
    reason: OnceLock<CancelReason>,
    notify: Notify,
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            reason: OnceLock::new(),
            notify: Notify::new(),
            deadline,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self, reason: CancelReason) {
        // First reason wins; later calls are no-ops.
        if self.reason.set(reason).is_err() {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }
}

/// A revocable scope observed cooperatively by racing tasks
#[derive(Clone)]
pub struct CancellationScope {
    inner: Arc<Inner>,
}

impl CancellationScope {
    /// Create a new root scope with no deadline
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(None)),
        }
    }

    /// Derive a child scope that is cancelled whenever this one is
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline)
    }

    /// Derive a child scope that also cancels itself after `timeout`
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Instant::now() + timeout)
    }

    /// Derive a child scope that also cancels itself at `deadline`
    ///
    /// The effective deadline is the earlier of `deadline` and the parent's.
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let inner = Arc::new(Inner::new(deadline));

        // The parent's reason is read under the children lock so a concurrent
        // cancel either sees this child in the list or we see its reason.
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.inner.reason.get() {
            Some(reason) => {
                let _ = inner.reason.set(*reason);
            }
            None => {
                children.retain(|child| child.strong_count() > 0);
                children.push(Arc::downgrade(&inner));
            }
        }
        drop(children);

        Self { inner }
    }

    /// Cancel this scope and every scope derived from it
    pub fn cancel(&self) {
        self.inner.cancel(CancelReason::Requested);
    }

    /// Cancel with an explicit reason; the first recorded reason is kept
    pub fn cancel_with(&self, reason: CancelReason) {
        self.inner.cancel(reason);
    }

    /// Whether the scope has been cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        if self.inner.reason.get().is_some() {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.inner.cancel(CancelReason::DeadlineExceeded);
                true
            }
            _ => false,
        }
    }

    /// The reason the scope was cancelled, if it was
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            self.inner.reason.get().copied()
        } else {
            None
        }
    }

    /// The deadline inherited or set on this scope
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Wait until the scope is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }

            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Return a guard that cancels this scope when dropped
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            scope: Some(self.clone()),
        }
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationScope")
            .field("reason", &self.inner.reason.get())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Cancels its scope on drop unless disarmed
#[derive(Debug)]
pub struct CancelOnDrop {
    scope: Option<CancellationScope>,
}

impl CancelOnDrop {
    /// Release the guard without cancelling the scope
    pub fn disarm(mut self) -> CancellationScope {
        self.scope.take().unwrap_or_default()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
    }
}
