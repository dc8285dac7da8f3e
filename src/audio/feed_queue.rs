//! Bounded queue of interleaved PCM frames between `feed()` and the
//! processing task.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Interleaved samples tagged with the model generation they were fed
/// under, so frames that raced a rebuild can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub generation: u64,
    pub samples: Vec<i16>,
}

pub struct FeedQueue<T = QueuedFrame> {
    frames: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> FeedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Enqueue without blocking. A full queue hands the frame back.
    pub fn try_push(&self, frame: T) -> Result<(), T> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            return Err(frame);
        }
        frames.push_back(frame);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue, waiting up to `timeout` for a frame to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut frames = self.frames.lock();
        if frames.is_empty() {
            self.not_empty.wait_for(&mut frames, timeout);
        }
        frames.pop_front()
    }

    /// Drop every queued frame; returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let n = frames.len();
        frames.clear();
        n
    }
}
