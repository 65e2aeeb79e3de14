use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Countdown latch: `wait` parks until `count_down` has been called as many
/// times as the initial count.
pub struct Latch {
    remaining: Mutex<usize>,
    cond_var: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cond_var: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut guard = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard > 0 {
            *guard -= 1;
            if *guard == 0 {
                self.cond_var.notify_all();
            }
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let mut guard = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        while *guard > 0 {
            guard = self
                .cond_var
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns `false` if the count has not reached zero within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        while *guard > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cond_var
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Counts down once when dropped, so a latch is released on every exit path
/// of the thread holding it, panics included.
pub struct CountDownOnDrop<'a>(pub &'a Latch);

impl Drop for CountDownOnDrop<'_> {
    fn drop(&mut self) {
        self.0.count_down();
    }
}
