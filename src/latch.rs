//! Abortable countdown latch signaling when a time slice is fully aggregated.
//! Batches race to count it down; the first abort wins and is sticky.

use std::sync::Mutex;

use tokio::sync::Notify;

/// Latch lifecycle. `Pending` exists only between run creation and the
/// index result arriving; `arm` moves it to `Running` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatchState {
    Pending,
    Running { remaining: usize },
    Complete,
    Aborted { message: String },
}

impl LatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LatchState::Complete | LatchState::Aborted { .. })
    }
}

#[derive(Debug)]
pub struct SignalingLatch {
    state: Mutex<LatchState>,
    notify: Notify,
}

impl Default for SignalingLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::Pending),
            notify: Notify::new(),
        }
    }

    /// Set the countdown to the number of schedules discovered for the
    /// slice. Arming with zero completes immediately (nothing to do).
    /// Only a `Pending` latch can be armed; an already-aborted latch
    /// stays aborted.
    pub fn arm(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        if *state != LatchState::Pending {
            return;
        }
        if count == 0 {
            *state = LatchState::Complete;
            drop(state);
            self.notify.notify_waiters();
        } else {
            *state = LatchState::Running { remaining: count };
        }
    }

    /// Count `n` schedules as done. Reaching exactly zero completes the
    /// latch and releases waiters. No-op in any terminal state.
    pub fn count_down(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        let LatchState::Running { remaining } = &mut *state else {
            return;
        };
        *remaining = remaining.saturating_sub(n);
        if *remaining == 0 {
            *state = LatchState::Complete;
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Record a fatal error and release waiters. The first abort wins;
    /// later aborts and count-downs are no-ops.
    pub fn abort(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, LatchState::Aborted { .. }) {
            return;
        }
        *state = LatchState::Aborted {
            message: message.into(),
        };
        drop(state);
        self.notify.notify_waiters();
    }

    /// Wait until the latch reaches a terminal state. Returns the abort
    /// message on failure.
    pub async fn wait(&self) -> Result<(), String> {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().unwrap();
                match &*state {
                    LatchState::Complete => return Ok(()),
                    LatchState::Aborted { message } => return Err(message.clone()),
                    _ => {}
                }
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> LatchState {
        self.state.lock().unwrap().clone()
    }
}
