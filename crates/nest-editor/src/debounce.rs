use std::cell::Cell;
use std::time::{Duration, Instant};

/// Trailing-edge debouncer driven by explicit timestamps.
///
/// `schedule` (re)arms the deadline; `fire` reports true exactly once when
/// polled at or after it.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Cell<Option<Instant>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: Cell::new(None),
        }
    }

    pub fn schedule(&self, now: Instant) {
        self.deadline.set(Some(now + self.delay));
    }

    pub fn cancel(&self) {
        self.deadline.set(None);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.get().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    /// True if the quiet period has elapsed; disarms the debouncer.
    pub fn fire(&self, now: Instant) -> bool {
        match self.deadline.get() {
            Some(at) if now >= at => {
                self.deadline.set(None);
                true
            }
            _ => false,
        }
    }
}
