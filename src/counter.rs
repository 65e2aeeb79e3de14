use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use tracing::{info, warn};

use crate::error::{join_task, Error, Result};

pub trait Counter: Sync {
    fn increment(&self);
    fn value(&self) -> u64;
}

/// Read, pause, write back. Nothing stops two threads from reading the same
/// value, so increments get lost.
pub struct RacyCounter {
    value: AtomicU64,
    work_delay: Duration,
}

impl RacyCounter {
    pub fn new(work_delay: Duration) -> Self {
        Self {
            value: AtomicU64::new(0),
            work_delay,
        }
    }
}

impl Counter for RacyCounter {
    fn increment(&self) {
        let current = self.value.load(Ordering::Relaxed);
        simulate_work(self.work_delay);
        self.value.store(current + 1, Ordering::Relaxed);
    }

    fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Same read, pause, write back, but the whole sequence runs under the lock.
pub struct GuardedCounter {
    value: Mutex<u64>,
    work_delay: Duration,
}

impl GuardedCounter {
    pub fn new(work_delay: Duration) -> Self {
        Self {
            value: Mutex::new(0),
            work_delay,
        }
    }
}

impl Counter for GuardedCounter {
    fn increment(&self) {
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *guard;
        simulate_work(self.work_delay);
        *guard = current + 1;
    }

    fn value(&self) -> u64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn simulate_work(delay: Duration) {
    if delay.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(delay);
    }
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub tasks: usize,
    pub increments_per_task: usize,
    pub work_delay: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            tasks: 3,
            increments_per_task: 1000,
            work_delay: Duration::from_micros(100),
        }
    }
}

impl CounterConfig {
    pub fn expected(&self) -> u64 {
        (self.tasks * self.increments_per_task) as u64
    }

    fn validate(&self) -> Result<()> {
        if self.tasks == 0 {
            return Err(Error::InvalidConfig("counter needs at least one task".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReport {
    pub expected: u64,
    pub unprotected: u64,
    pub protected: u64,
}

impl CounterReport {
    pub fn lost_updates(&self) -> u64 {
        self.expected.saturating_sub(self.unprotected)
    }
}

/// Spawns `tasks` threads that each call `increment` `increments_per_task`
/// times, joins them all and returns the final value.
pub fn run_simulation<C: Counter>(counter: &C, config: &CounterConfig) -> Result<u64> {
    config.validate()?;
    thread::scope(|s| {
        let handles: Vec<_> = (0..config.tasks)
            .map(|task| {
                let handle = thread::Builder::new()
                    .name(format!("incrementer-{task}"))
                    .spawn_scoped(s, move || {
                        for _ in 0..config.increments_per_task {
                            counter.increment();
                        }
                    });
                (task, handle)
            })
            .collect();

        let mut failure = None;
        for (task, handle) in handles {
            if let Err(err) = join_task(format!("incrementer-{task}"), handle) {
                failure.get_or_insert(err);
            }
        }
        failure.map_or(Ok(()), Err)
    })?;
    Ok(counter.value())
}

/// Runs the same workload once without the lock and once with it.
pub fn compare(config: &CounterConfig) -> Result<CounterReport> {
    let expected = config.expected();

    let unprotected = run_simulation(&RacyCounter::new(config.work_delay), config)?;
    if unprotected != expected {
        warn!(expected, actual = unprotected, "race condition lost updates");
    } else {
        info!(expected, "unprotected run happened to finish intact");
    }

    let protected = run_simulation(&GuardedCounter::new(config.work_delay), config)?;
    info!(expected, actual = protected, "guarded run finished");

    Ok(CounterReport {
        expected,
        unprotected,
        protected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CounterConfig {
        CounterConfig {
            tasks: 3,
            increments_per_task: 1000,
            work_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_guarded_counter_is_exact() {
        let config = small_config();
        for _ in 0..5 {
            let value = run_simulation(&GuardedCounter::new(Duration::ZERO), &config).unwrap();
            assert_eq!(value, 3000);
        }
    }

    #[test]
    fn test_guarded_counter_with_delay() {
        let config = CounterConfig {
            tasks: 4,
            increments_per_task: 50,
            work_delay: Duration::from_micros(50),
        };
        let value = run_simulation(&GuardedCounter::new(config.work_delay), &config).unwrap();
        assert_eq!(value, config.expected());
    }

    #[test]
    fn test_racy_counter_loses_updates() {
        let config = CounterConfig {
            tasks: 3,
            increments_per_task: 200,
            work_delay: Duration::from_micros(100),
        };
        let lost = (0..10).any(|_| {
            let value = run_simulation(&RacyCounter::new(config.work_delay), &config).unwrap();
            assert!(value <= config.expected());
            value < config.expected()
        });
        assert!(lost, "expected at least one run to lose an update");
    }

    #[test]
    fn test_single_task_never_races() {
        let config = CounterConfig {
            tasks: 1,
            increments_per_task: 500,
            work_delay: Duration::ZERO,
        };
        let value = run_simulation(&RacyCounter::new(Duration::ZERO), &config).unwrap();
        assert_eq!(value, 500);
    }

    #[test]
    fn test_compare_report() {
        let config = CounterConfig {
            tasks: 2,
            increments_per_task: 100,
            work_delay: Duration::ZERO,
        };
        let report = compare(&config).unwrap();
        assert_eq!(report.expected, 200);
        assert_eq!(report.protected, 200);
        assert_eq!(report.lost_updates(), 200 - report.unprotected);
    }

    #[test]
    fn test_zero_tasks_rejected() {
        let config = CounterConfig {
            tasks: 0,
            ..small_config()
        };
        let err = run_simulation(&GuardedCounter::new(Duration::ZERO), &config).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    struct ExplodingCounter;

    impl Counter for ExplodingCounter {
        fn increment(&self) {
            panic!("increment failed");
        }

        fn value(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_task_panic_is_reported() {
        let err = run_simulation(&ExplodingCounter, &small_config()).unwrap_err();
        match err {
            Error::TaskPanicked { task, message } => {
                assert!(task.starts_with("incrementer-"));
                assert_eq!(message, "increment failed");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
