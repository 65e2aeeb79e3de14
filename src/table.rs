use std::{
    fmt,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    jitter,
    latch::{CountDownOnDrop, Latch},
};

const NO_HOLDER: usize = usize::MAX;

/// Exclusive resource between two neighbouring seats. Besides the lock it
/// records which seat holds it; the holder is written and cleared under the
/// lock, so it is a record, not a check. `Table::enter` is what catches two
/// neighbours eating at once.
pub struct Fork {
    index: usize,
    lock: Mutex<()>,
    holder: AtomicUsize,
}

impl Fork {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            lock: Mutex::new(()),
            holder: AtomicUsize::new(NO_HOLDER),
        }
    }

    /// Blocks until the fork is free, then hands it to `seat` until the
    /// returned guard is dropped.
    pub fn pick_up(&self, seat: usize) -> ForkGuard<'_> {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.holder.store(seat, Ordering::Release);
        ForkGuard {
            fork: self,
            _guard: guard,
        }
    }

    pub fn holder(&self) -> Option<usize> {
        match self.holder.load(Ordering::Acquire) {
            NO_HOLDER => None,
            seat => Some(seat),
        }
    }
}

pub struct ForkGuard<'a> {
    fork: &'a Fork,
    _guard: MutexGuard<'a, ()>,
}

impl ForkGuard<'_> {
    pub fn index(&self) -> usize {
        self.fork.index
    }
}

impl Drop for ForkGuard<'_> {
    // Runs before `_guard` unlocks the mutex.
    fn drop(&mut self) {
        self.fork.holder.store(NO_HOLDER, Ordering::Release);
    }
}

/// Order in which `seat` picks up its forks: lower index first.
///
/// Seat `i` sits between fork `i` (left) and fork `(i + 1) % seats` (right).
/// Every seat follows the same global order, so no ring of seats can each
/// hold one fork while waiting on the next; the seat whose right fork wraps
/// around to 0 reaches for its right fork first.
pub fn acquisition_order(seat: usize, seats: usize) -> (usize, usize) {
    let left = seat;
    let right = (seat + 1) % seats;
    (left.min(right), left.max(right))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatState {
    Thinking,
    Hungry,
    Eating,
}

impl fmt::Display for SeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatState::Thinking => write!(f, "thinking"),
            SeatState::Hungry => write!(f, "hungry"),
            SeatState::Eating => write!(f, "eating"),
        }
    }
}

/// Shared flag used to end an open-ended dinner.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub enum Termination {
    /// Every seat leaves after this many meals.
    Meals(usize),
    /// Seats keep cycling until the signal is raised.
    Until(StopSignal),
}

#[derive(Debug, Clone)]
pub struct TableConfig {
    pub seats: usize,
    pub think_time: RangeInclusive<Duration>,
    pub eat_time: RangeInclusive<Duration>,
    /// Delay between seating one philosopher and the next.
    pub stagger: Duration,
    pub termination: Termination,
    /// Longest the table may go without a single meal before the run is
    /// declared deadlocked.
    pub deadlock_timeout: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            seats: 3,
            think_time: Duration::from_millis(1000)..=Duration::from_millis(2500),
            eat_time: Duration::from_millis(1000)..=Duration::from_millis(2000),
            stagger: Duration::from_millis(100),
            termination: Termination::Meals(3),
            deadlock_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableReport {
    pub meals_per_seat: Vec<usize>,
    pub total_meals: usize,
    pub elapsed: Duration,
}

struct Table {
    config: TableConfig,
    forks: Vec<Fork>,
    states: Mutex<Vec<SeatState>>,
    meals: Vec<AtomicUsize>,
    stop: StopSignal,
    seated: Latch,
}

impl Table {
    fn new(config: TableConfig) -> Self {
        let seats = config.seats;
        let stop = match &config.termination {
            Termination::Until(signal) => signal.clone(),
            Termination::Meals(_) => StopSignal::new(),
        };
        Self {
            forks: (0..seats).map(Fork::new).collect(),
            states: Mutex::new(vec![SeatState::Thinking; seats]),
            meals: (0..seats).map(|_| AtomicUsize::new(0)).collect(),
            seated: Latch::new(seats),
            stop,
            config,
        }
    }

    fn keeps_dining(&self, meals: usize) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        match self.config.termination {
            Termination::Meals(target) => meals < target,
            Termination::Until(_) => true,
        }
    }

    fn total_meals(&self) -> usize {
        self.meals.iter().map(|m| m.load(Ordering::Acquire)).sum()
    }

    /// Records a state change. Entering `Eating` next to an eating neighbour
    /// means a shared fork has two holders.
    fn enter(&self, seat: usize, state: SeatState, meal: usize) -> Result<()> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let seats = states.len();
        if state == SeatState::Eating {
            let left_neighbour = (seat + seats - 1) % seats;
            let right_neighbour = (seat + 1) % seats;
            if states[left_neighbour] == SeatState::Eating {
                return Err(Error::ForkConflict {
                    fork: seat,
                    holder: left_neighbour,
                    seat,
                });
            }
            if states[right_neighbour] == SeatState::Eating {
                return Err(Error::ForkConflict {
                    fork: right_neighbour,
                    holder: right_neighbour,
                    seat,
                });
            }
        }
        states[seat] = state;
        info!(seat, %state, meal, "seat state changed");
        Ok(())
    }

    fn dine(&self, seat: usize) -> Result<usize> {
        let (first, second) = acquisition_order(seat, self.forks.len());
        let mut meals = 0;

        while self.keeps_dining(meals) {
            self.enter(seat, SeatState::Thinking, meals + 1)?;
            jitter::pause(&self.config.think_time);
            if !self.keeps_dining(meals) {
                break;
            }

            self.enter(seat, SeatState::Hungry, meals + 1)?;
            {
                let first_fork = self.forks[first].pick_up(seat);
                debug!(seat, fork = first_fork.index(), "picked up fork");
                let second_fork = self.forks[second].pick_up(seat);
                debug!(seat, fork = second_fork.index(), "picked up fork");

                self.enter(seat, SeatState::Eating, meals + 1)?;
                jitter::pause(&self.config.eat_time);
                meals += 1;
                self.meals[seat].fetch_add(1, Ordering::AcqRel);
                self.enter(seat, SeatState::Thinking, meals)?;
            }
            debug!(seat, first, second, "put down forks");
        }

        debug!(seat, meals, "leaving the table");
        Ok(meals)
    }
}

fn validate(config: &TableConfig) -> Result<()> {
    if config.seats < 2 {
        return Err(Error::InvalidConfig(format!(
            "a table needs at least two seats, got {}",
            config.seats
        )));
    }
    if config.deadlock_timeout.is_zero() {
        return Err(Error::InvalidConfig("deadlock timeout must be positive".into()));
    }
    Ok(())
}

/// Seats the philosophers, one thread each, and waits for them to leave.
///
/// A watchdog checks that at least one meal is eaten per
/// `deadlock_timeout`; if the table stalls, the run is stopped and
/// `Error::Deadlock` is returned without joining the stuck threads.
pub fn run(config: TableConfig) -> Result<TableReport> {
    validate(&config)?;
    info!(
        seats = config.seats,
        termination = ?config.termination,
        "seating philosophers"
    );

    serve(Arc::new(Table::new(config)))
}

fn serve(table: Arc<Table>) -> Result<TableReport> {
    let seats = table.config.seats;
    let deadlock_timeout = table.config.deadlock_timeout;
    let started = Instant::now();

    let mut handles = Vec::with_capacity(seats);
    for seat in 0..seats {
        if seat > 0 && !table.config.stagger.is_zero() {
            thread::sleep(table.config.stagger);
        }
        let seat_table = Arc::clone(&table);
        let handle = thread::Builder::new()
            .name(format!("philosopher-{seat}"))
            .spawn(move || {
                let _leave = CountDownOnDrop(&seat_table.seated);
                seat_table.dine(seat)
            });
        match handle {
            Ok(handle) => handles.push((seat, handle)),
            Err(err) => {
                table.stop.stop();
                return Err(Error::TaskPanicked {
                    task: format!("philosopher-{seat}"),
                    message: err.to_string(),
                });
            }
        }
    }

    let mut last_total = table.total_meals();
    while !table.seated.wait_timeout(deadlock_timeout) {
        let total = table.total_meals();
        if total == last_total {
            table.stop.stop();
            warn!(?deadlock_timeout, eaten = total, "table stalled");
            return Err(Error::Deadlock {
                timeout: deadlock_timeout,
                eaten: total,
            });
        }
        last_total = total;
    }

    let mut meals_per_seat = vec![0; seats];
    let mut failure = None;
    for (seat, handle) in handles {
        let outcome = handle
            .join()
            .map_err(|payload| Error::panicked(format!("philosopher-{seat}"), payload))
            .and_then(|meals| meals);
        match outcome {
            Ok(meals) => meals_per_seat[seat] = meals,
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }

    let total_meals = meals_per_seat.iter().sum();
    let elapsed = started.elapsed();
    info!(total_meals, ?elapsed, "all philosophers have left the table");
    Ok(TableReport {
        meals_per_seat,
        total_meals,
        elapsed,
    })
}
