use std::{ops::RangeInclusive, thread, time::Duration};

use rand::Rng;

/// Picks a random duration inside `range`, microsecond resolution.
pub fn pick(range: &RangeInclusive<Duration>) -> Duration {
    let low = range.start().as_micros() as u64;
    let high = range.end().as_micros() as u64;
    if high <= low {
        return *range.start();
    }
    Duration::from_micros(rand::rng().random_range(low..=high))
}

/// Sleeps for a random duration inside `range` and returns how long it slept.
pub fn pause(range: &RangeInclusive<Duration>) -> Duration {
    let delay = pick(range);
    if !delay.is_zero() {
        thread::sleep(delay);
    }
    delay
}
