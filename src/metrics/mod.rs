//! Metrics collection module
//!
//! Tracks the state of every task in a race and how many operations were
//! executing at the same time.

use crate::race::{TaskRecord, TaskState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Per-race task instrumentation shared by all tasks
pub struct RaceMetrics {
    /// Operation names, in submission order
    names: Vec<String>,
    /// Current state per task
    states: RwLock<Vec<TaskState>>,
    /// Operations executing right now
    running: AtomicUsize,
    /// Highest value `running` has reached
    peak_running: AtomicUsize,
    /// Operations that have been invoked
    invoked: AtomicUsize,
}

impl RaceMetrics {
    /// Create metrics for the given operations, all starting out queued
    pub fn new(names: Vec<String>) -> Self {
        let states = vec![TaskState::Queued; names.len()];
        Self {
            names,
            states: RwLock::new(states),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            invoked: AtomicUsize::new(0),
        }
    }

    /// Record a state transition for task `index`
    pub fn transition(&self, index: usize, state: TaskState) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = states.get_mut(index) {
            *slot = state;
        }
    }

    /// Mark task `index` as running until the returned guard is dropped
    pub fn enter_running(self: &Arc<Self>, index: usize) -> RunningGuard {
        self.transition(index, TaskState::Running);
        self.invoked.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);

        RunningGuard {
            metrics: self.clone(),
        }
    }

    /// Current state of task `index`
    pub fn state(&self, index: usize) -> Option<TaskState> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(index).copied()
    }

    /// Name of task `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }

    /// Operations executing right now
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of operations seen executing at once
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    /// Number of operations invoked so far
    pub fn invoked(&self) -> usize {
        self.invoked.load(Ordering::SeqCst)
    }

    /// Snapshot of every task's state, in submission order
    pub fn records(&self) -> Vec<TaskRecord> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        self.names
            .iter()
            .zip(states.iter())
            .map(|(name, state)| TaskRecord {
                operation: name.clone(),
                state: *state,
            })
            .collect()
    }
}

/// Leaves the running state when dropped, including on panic
pub struct RunningGuard {
    metrics: Arc<RaceMetrics>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.metrics.running.fetch_sub(1, Ordering::SeqCst);
    }
}
