use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Sender};
use tracing::{debug, error, info};

use crate::error::{Error, Result};

pub const DEFAULT_ITEM_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// Computes the n-th Fibonacci number, then waits.
    Fibonacci(u32),
    /// Pure waiting, standing in for file or network latency.
    Io,
    /// Sums `1..upto`, waiting briefly every few hundred steps.
    Counting(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutput {
    Fibonacci(u128),
    Io,
    Counted(u64),
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: usize,
    pub kind: WorkKind,
    /// Simulated latency the item spends blocked.
    pub duration: Duration,
}

const COUNTING_CHUNK: u64 = 200;

impl WorkItem {
    pub fn new(id: usize, kind: WorkKind, duration: Duration) -> Self {
        Self { id, kind, duration }
    }

    pub fn execute(&self) -> WorkOutput {
        match self.kind {
            WorkKind::Fibonacci(n) => {
                let value = fibonacci(n);
                thread::sleep(self.duration);
                WorkOutput::Fibonacci(value)
            }
            WorkKind::Io => {
                thread::sleep(self.duration);
                WorkOutput::Io
            }
            WorkKind::Counting(upto) => {
                let pauses = (upto.saturating_sub(1) / COUNTING_CHUNK).max(1);
                let pause = self.duration / pauses as u32;
                let mut total = 0u64;
                for i in 1..upto {
                    total += i;
                    if i % COUNTING_CHUNK == 0 {
                        thread::sleep(pause);
                    }
                }
                if upto <= COUNTING_CHUNK {
                    thread::sleep(self.duration);
                }
                WorkOutput::Counted(total)
            }
        }
    }
}

fn fibonacci(n: u32) -> u128 {
    let (mut a, mut b) = (0u128, 1u128);
    for _ in 0..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

/// The ten-item mix of compute, waiting and counting work used by the demo.
pub fn default_backlog(duration: Duration) -> Vec<WorkItem> {
    [
        WorkKind::Fibonacci(20),
        WorkKind::Io,
        WorkKind::Counting(1000),
        WorkKind::Fibonacci(15),
        WorkKind::Io,
        WorkKind::Counting(800),
        WorkKind::Io,
        WorkKind::Fibonacci(25),
        WorkKind::Counting(1200),
        WorkKind::Io,
    ]
    .into_iter()
    .enumerate()
    .map(|(id, kind)| WorkItem::new(id, kind, duration))
    .collect()
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub item: usize,
    pub worker: usize,
    pub output: WorkOutput,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolReport {
    pub workers: usize,
    pub elapsed: Duration,
    /// In completion order.
    pub completions: Vec<Completion>,
}

impl PoolReport {
    /// Items handled per worker.
    pub fn utilization(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for completion in &self.completions {
            *counts.entry(completion.worker).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct PoolComparison {
    pub sequential: PoolReport,
    pub parallel: PoolReport,
}

impl PoolComparison {
    pub fn speedup(&self) -> f64 {
        let parallel = self.parallel.elapsed.as_secs_f64();
        if parallel == 0.0 {
            return 0.0;
        }
        self.sequential.elapsed.as_secs_f64() / parallel
    }

    /// Speedup as a share of the ideal, in percent.
    pub fn efficiency(&self) -> f64 {
        self.speedup() / self.parallel.workers as f64 * 100.0
    }
}

fn execute<F>(worker: usize, item: &WorkItem, job: &F) -> Result<Completion>
where
    F: Fn(&WorkItem) -> Result<WorkOutput>,
{
    let started = Instant::now();
    debug!(worker, item = item.id, kind = ?item.kind, "starting work item");

    let output = match panic::catch_unwind(AssertUnwindSafe(|| job(item))) {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(Error::WorkFailed {
                item: item.id,
                reason: err.to_string(),
            })
        }
        Err(payload) => return Err(Error::panicked(format!("work item {}", item.id), payload)),
    };

    let elapsed = started.elapsed();
    debug!(worker, item = item.id, ?elapsed, "completed work item");
    Ok(Completion {
        item: item.id,
        worker,
        output,
        elapsed,
    })
}

/// Keeps the completions and returns the first failure, if any, once every
/// item has been accounted for.
fn settle(outcomes: Vec<Result<Completion>>) -> Result<Vec<Completion>> {
    let mut completions = Vec::with_capacity(outcomes.len());
    let mut failure = None;
    for outcome in outcomes {
        match outcome {
            Ok(completion) => completions.push(completion),
            Err(err) => {
                error!(%err, "work item failed");
                failure.get_or_insert(err);
            }
        }
    }
    failure.map_or(Ok(completions), Err)
}

/// Runs every item one after another on the calling thread.
pub fn run_sequential<F>(items: &[WorkItem], job: F) -> Result<PoolReport>
where
    F: Fn(&WorkItem) -> Result<WorkOutput>,
{
    let started = Instant::now();
    let outcomes = items.iter().map(|item| execute(0, item, &job)).collect();
    let completions = settle(outcomes)?;
    let elapsed = started.elapsed();
    info!(items = items.len(), ?elapsed, "sequential execution finished");
    Ok(PoolReport {
        workers: 1,
        elapsed,
        completions,
    })
}

/// Hands every item to a pool of `workers` threads and waits for all of them.
///
/// The backlog is a closed channel holding every item; each worker keeps
/// receiving until it runs dry, so every item is claimed by exactly one worker.
pub fn run_parallel<F>(items: &[WorkItem], config: &PoolConfig, job: F) -> Result<PoolReport>
where
    F: Fn(&WorkItem) -> Result<WorkOutput> + Sync,
{
    if config.workers == 0 {
        return Err(Error::InvalidConfig("a pool needs at least one worker".into()));
    }

    let started = Instant::now();
    let (backlog_tx, backlog_rx) = unbounded::<&WorkItem>();
    for item in items {
        // the receiver is alive until the end of this function
        let _ = backlog_tx.send(item);
    }
    drop(backlog_tx);

    let (done_tx, done_rx) = unbounded::<Result<Completion>>();
    let job = &job;
    let spawned = crossbeam::thread::scope(|s| {
        let mut spawned = 0;
        for worker in 0..config.workers {
            let backlog = backlog_rx.clone();
            let done: Sender<Result<Completion>> = done_tx.clone();
            let handle = s
                .builder()
                .name(format!("worker-{worker}"))
                .spawn(move |_| {
                    while let Ok(item) = backlog.recv() {
                        if done.send(execute(worker, item, job)).is_err() {
                            break;
                        }
                    }
                });
            match handle {
                Ok(_) => spawned += 1,
                Err(err) => error!(worker, %err, "failed to spawn worker"),
            }
        }
        spawned
    })
    .map_err(|payload| Error::panicked("worker pool", payload))?;
    drop(done_tx);

    let outcomes: Vec<_> = done_rx.try_iter().collect();
    if spawned == 0 || outcomes.len() != items.len() {
        return Err(Error::TaskPanicked {
            task: "worker pool".into(),
            message: format!(
                "{} of {} items finished with {spawned} workers",
                outcomes.len(),
                items.len()
            ),
        });
    }
    let completions = settle(outcomes)?;

    let elapsed = started.elapsed();
    info!(
        items = items.len(),
        workers = config.workers,
        ?elapsed,
        "parallel execution finished"
    );
    Ok(PoolReport {
        workers: config.workers,
        elapsed,
        completions,
    })
}

/// Runs the same backlog sequentially and then through the pool.
pub fn compare(items: &[WorkItem], config: &PoolConfig) -> Result<PoolComparison> {
    let job = |item: &WorkItem| -> Result<WorkOutput> { Ok(item.execute()) };
    let sequential = run_sequential(items, job)?;
    let parallel = run_parallel(items, config, job)?;
    Ok(PoolComparison {
        sequential,
        parallel,
    })
}
