//! Small event-flag group used to signal the processing task.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Processing is enabled (between `start()` and `stop()`).
pub const RUNNING: u32 = 1 << 0;
/// `stop()` asked the task to exit.
pub const STOP_REQUEST: u32 = 1 << 1;
/// A reconfiguration asked the task to pause.
pub const PAUSE_REQUEST: u32 = 1 << 2;
/// The task is parked outside any model call.
pub const PAUSED: u32 = 1 << 3;
/// The task thread is alive.
pub const TASK_ALIVE: u32 = 1 << 4;

/// A set of bits guarded by a mutex, with waiters woken on every change.
pub struct EventFlags {
    bits: Mutex<u32>,
    cond: Condvar,
}

impl EventFlags {
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub fn get(&self) -> u32 {
        *self.bits.lock()
    }

    pub fn is_set(&self, mask: u32) -> bool {
        self.get() & mask == mask
    }

    /// Set `mask` and return the new bits.
    pub fn set(&self, mask: u32) -> u32 {
        let mut bits = self.bits.lock();
        *bits |= mask;
        self.cond.notify_all();
        *bits
    }

    /// Clear `mask` and return the new bits.
    pub fn clear(&self, mask: u32) -> u32 {
        let mut bits = self.bits.lock();
        *bits &= !mask;
        self.cond.notify_all();
        *bits
    }

    /// Block until `pred` holds or `timeout` elapses. Returns the bits that
    /// satisfied the predicate, or `None` on timeout.
    pub fn wait_until<F>(&self, pred: F, timeout: Duration) -> Option<u32>
    where
        F: Fn(u32) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut bits = self.bits.lock();
        while !pred(*bits) {
            if self.cond.wait_until(&mut bits, deadline).timed_out() {
                return if pred(*bits) { Some(*bits) } else { None };
            }
        }
        Some(*bits)
    }

    /// Like `wait_until`, but clears `mask` under the same lock once the
    /// predicate holds, so no other thread can observe the stale bits.
    pub fn wait_and_clear<F>(&self, pred: F, mask: u32, timeout: Duration) -> Option<u32>
    where
        F: Fn(u32) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut bits = self.bits.lock();
        while !pred(*bits) {
            if self.cond.wait_until(&mut bits, deadline).timed_out() && !pred(*bits) {
                return None;
            }
        }
        let seen = *bits;
        *bits &= !mask;
        self.cond.notify_all();
        Some(seen)
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_and_clear() {
        let flags = EventFlags::new();
        assert_eq!(flags.set(RUNNING | PAUSED), RUNNING | PAUSED);
        assert!(flags.is_set(RUNNING));
        assert_eq!(flags.clear(PAUSED), RUNNING);
        assert!(!flags.is_set(PAUSED));
    }

    #[test]
    fn wait_times_out() {
        let flags = EventFlags::new();
        assert_eq!(flags.wait_until(|b| b & STOP_REQUEST != 0, Duration::from_millis(20)), None);
    }

    #[test]
    fn wait_wakes_on_other_thread() {
        let flags = Arc::new(EventFlags::new());
        let setter = {
            let flags = flags.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                flags.set(PAUSED);
            })
        };
        let bits = flags.wait_until(|b| b & PAUSED != 0, Duration::from_secs(2));
        assert!(bits.is_some_and(|b| b & PAUSED != 0));
        setter.join().unwrap();
    }

    #[test]
    fn wait_and_clear_is_atomic() {
        let flags = EventFlags::new();
        flags.set(PAUSED);
        let seen = flags.wait_and_clear(|b| b & PAUSE_REQUEST == 0, PAUSED, Duration::from_millis(5));
        assert_eq!(seen, Some(PAUSED));
        assert_eq!(flags.get(), 0);
    }

    #[test]
    fn wait_until_checks_cleared_bits() {
        let flags = EventFlags::new();
        flags.set(PAUSE_REQUEST);
        flags.clear(PAUSE_REQUEST);
        let bits = flags.wait_until(|b| b & PAUSE_REQUEST == 0, Duration::from_millis(5));
        assert_eq!(bits, Some(0));
    }
}
