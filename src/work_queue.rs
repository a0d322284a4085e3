use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::encounter_log::TransitionError;

/// Why a record could not be handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{0} worker is not running")]
    NotRunning(&'static str),
    #[error("no encounter log with id '{0}'")]
    UnknownLog(String),
}

struct QueueState<T> {
    items: VecDeque<T>,
    running: bool,
}

/// FIFO hand-off between producers and a single consumer thread.
///
/// A consumer blocks until an item arrives or the queue is shut down. Shutdown
/// drops pending items and wakes every waiter.
pub(crate) struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    condvar: Condvar,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                running: true,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Returns `false` when the queue was already shut down and the item was dropped.
    pub(crate) fn push(&self, item: T) -> bool {
        {
            let mut state = self.lock();
            if !state.running {
                return false;
            }
            state.items.push_back(item);
        }

        self.condvar.notify_one();
        true
    }

    /// Blocks until an item is available. `None` means the queue was shut down.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Blocks until the queue is non-empty without taking anything out.
    /// Returns `false` on shutdown.
    pub(crate) fn wait_for_item(&self) -> bool {
        let mut state = self.lock();
        loop {
            if !state.running {
                return false;
            }
            if !state.items.is_empty() {
                return true;
            }
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        if !state.running {
            return None;
        }
        state.items.pop_front()
    }

    /// Sleeps for `duration` unless the queue is shut down first.
    /// Returns `false` if shutdown interrupted the sleep.
    pub(crate) fn sleep_while_running(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.lock();
        loop {
            if !state.running {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (next_state, _) = self
                .condvar
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next_state;
        }
    }

    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.running = false;
            state.items.clear();
        }

        self.condvar.notify_all();
    }
}
