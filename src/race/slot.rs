//! Shared cells written by racing tasks
//!
//! [`ResultSlot`] is a single-assignment cell: exactly one caller of
//! [`ResultSlot::try_set`] wins, every later value is dropped.
//! [`ErrorAggregator`] is a last-write-wins cell: whichever failure is written
//! last in real time is the one kept. When several tasks fail at effectively
//! the same instant, which of them is "last" is decided by lock order and is
//! not deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Claim<R> {
    winner: usize,
    value: Option<R>,
}

/// Single-assignment handoff for the winning result
pub struct ResultSlot<R> {
    claim: Mutex<Option<Claim<R>>>,
    notify: Notify,
}

impl<R> ResultSlot<R> {
    pub fn new() -> Self {
        Self {
            claim: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Offer a value produced by task `index`
    ///
    /// Returns `true` if this call claimed the slot. A `false` return means
    /// another task got there first and `value` has been dropped.
    pub fn try_set(&self, index: usize, value: R) -> bool {
        let mut claim = lock(&self.claim);
        if claim.is_some() {
            return false;
        }
        *claim = Some(Claim {
            winner: index,
            value: Some(value),
        });
        drop(claim);

        self.notify.notify_waiters();
        true
    }

    /// Whether some task has claimed the slot
    pub fn is_claimed(&self) -> bool {
        lock(&self.claim).is_some()
    }

    /// Index of the task that claimed the slot
    pub fn winner(&self) -> Option<usize> {
        lock(&self.claim).as_ref().map(|claim| claim.winner)
    }

    /// Move the winning value out; the slot stays claimed
    pub fn take(&self) -> Option<R> {
        lock(&self.claim).as_mut().and_then(|claim| claim.value.take())
    }

    /// Wait until some task claims the slot
    pub async fn claimed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_claimed() {
                return;
            }
            notified.await;
        }
    }
}

impl<R> Default for ResultSlot<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutually exclusive "most recent failure" cell
pub struct ErrorAggregator<E> {
    last: Mutex<Option<(usize, E)>>,
    writes: AtomicUsize,
}

impl<E> ErrorAggregator<E> {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    /// Record a failure from task `index`, replacing whatever was stored
    pub fn set(&self, index: usize, error: E) {
        *lock(&self.last) = Some((index, error));
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Index of the task whose failure is currently stored
    pub fn last_writer(&self) -> Option<usize> {
        lock(&self.last).as_ref().map(|(index, _)| *index)
    }

    /// Total number of failures recorded
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Move the stored failure out, leaving the cell empty
    pub fn take(&self) -> Option<E> {
        lock(&self.last).take().map(|(_, error)| error)
    }
}

impl<E: Clone> ErrorAggregator<E> {
    /// The most recently recorded failure
    pub fn get(&self) -> Option<E> {
        lock(&self.last).as_ref().map(|(_, error)| error.clone())
    }
}

impl<E> Default for ErrorAggregator<E> {
    fn default() -> Self {
        Self::new()
    }
}
