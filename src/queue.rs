use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::model::WorkItem;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("producer already finished")]
    Finished,
}

/// Outcome of a waiting pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Item(WorkItem),
    /// Nothing arrived before the wait ran out; more may still come.
    Empty,
    /// Empty and no producer will push again.
    Finished,
}

#[derive(Default)]
struct State {
    items: VecDeque<WorkItem>,
    finished: bool,
    closed: bool,
}

/// FIFO shared by one producer and many workers. Each item is handed to
/// exactly one consumer.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    available: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: WorkItem) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.finished {
                return Err(QueueError::Finished);
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    #[cfg(test)]
    pub fn try_pop(&self) -> Option<WorkItem> {
        self.lock().items.pop_front()
    }

    /// Pop the next item, waiting up to `wait` for one to arrive.
    pub async fn pop_timeout(&self, wait: Duration) -> Pop {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Pop::Item(item);
                }
                if state.finished || state.closed {
                    return Pop::Finished;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Pop::Empty;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Signal that the producer will not push again.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.available.notify_waiters();
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Discard everything still queued, returning how many items were dropped.
    #[cfg(test)]
    pub fn drain(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    /// Reject further pushes and wake every waiter.
    #[cfg(test)]
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    /// Discard everything still queued and reject further pushes, under one
    /// lock so no push can land in between. Returns how many items were
    /// dropped.
    pub fn drain_and_close(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            let dropped = state.items.len();
            state.items.clear();
            state.closed = true;
            dropped
        };
        self.available.notify_waiters();
        dropped
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
