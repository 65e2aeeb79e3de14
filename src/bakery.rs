use std::{
    ops::RangeInclusive,
    sync::{Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    bounded_queue::{BoundedQueue, DEFAULT_CAPACITY},
    error::{join_task, Error, Result},
    jitter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bread {
    pub id: usize,
    pub baker: usize,
    /// Position of this loaf among the ones its baker put in the basket.
    pub sequence: usize,
}

/// What travels through the basket. Each customer leaves on the first
/// `Closed` it takes.
enum Delivery {
    Bread(Bread),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub customer: usize,
    pub bread: Bread,
}

#[derive(Debug, Clone)]
pub struct BakeryConfig {
    pub bakers: usize,
    pub customers: usize,
    pub total_items: usize,
    pub bake_time: RangeInclusive<Duration>,
    pub eat_time: RangeInclusive<Duration>,
}

impl Default for BakeryConfig {
    fn default() -> Self {
        Self {
            bakers: 2,
            customers: 2,
            total_items: 12,
            bake_time: Duration::from_millis(300)..=Duration::from_millis(800),
            eat_time: Duration::from_millis(500)..=Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BakeryReport {
    pub capacity: usize,
    pub produced: usize,
    pub consumed: usize,
    pub remaining: usize,
    pub high_water: usize,
    pub elapsed: Duration,
    /// Consumption log in the order loaves left the basket.
    pub deliveries: Vec<Consumption>,
}

struct Bakery {
    config: BakeryConfig,
    basket: BoundedQueue<Delivery, DEFAULT_CAPACITY>,
    next_bread: Mutex<usize>,
    /// Consumptions keyed by the basket's removal ticket.
    deliveries: Mutex<Vec<(u64, Consumption)>>,
}

impl Bakery {
    fn claim_bread(&self) -> Option<usize> {
        let mut next = self.next_bread.lock().unwrap_or_else(PoisonError::into_inner);
        if *next >= self.config.total_items {
            return None;
        }
        let id = *next;
        *next += 1;
        Some(id)
    }

    fn baker(&self, baker: usize) -> usize {
        let mut sequence = 0;
        while let Some(id) = self.claim_bread() {
            jitter::pause(&self.config.bake_time);
            self.basket.put(Delivery::Bread(Bread {
                id,
                baker,
                sequence,
            }));
            sequence += 1;
            info!(
                baker,
                bread = id,
                basket = self.basket.len(),
                capacity = self.basket.capacity(),
                "baked"
            );
        }
        debug!(baker, baked = sequence, "baker finished");
        sequence
    }

    fn customer(&self, customer: usize) -> usize {
        let mut eaten = 0;
        while let Delivery::Bread(bread) = self.take(customer) {
            jitter::pause(&self.config.eat_time);
            eaten += 1;
            info!(
                customer,
                bread = bread.id,
                baker = bread.baker,
                basket = self.basket.len(),
                "ate"
            );
        }
        debug!(customer, eaten, "customer finished");
        eaten
    }

    fn take(&self, customer: usize) -> Delivery {
        let (ticket, delivery) = self.basket.get_ticketed();
        if let Delivery::Bread(bread) = delivery {
            self.deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((ticket, Consumption { customer, bread }));
        }
        delivery
    }
}

fn validate(config: &BakeryConfig) -> Result<()> {
    if config.bakers == 0 || config.customers == 0 {
        return Err(Error::InvalidConfig(
            "bakery needs at least one baker and one customer".into(),
        ));
    }
    Ok(())
}

/// Runs bakers and customers against one basket until `total_items` loaves
/// have been baked and eaten.
///
/// Bakers are joined first; one `Closed` marker per customer then goes into
/// the basket behind every loaf, so customers drain the basket before leaving.
pub fn run(config: BakeryConfig) -> Result<BakeryReport> {
    validate(&config)?;
    info!(
        total_items = config.total_items,
        capacity = DEFAULT_CAPACITY,
        bakers = config.bakers,
        customers = config.customers,
        "bakery opening"
    );

    let bakery = Bakery {
        config,
        basket: BoundedQueue::new(),
        next_bread: Mutex::new(0),
        deliveries: Mutex::new(Vec::new()),
    };
    let started = Instant::now();

    let (produced, consumed) = thread::scope(|s| -> Result<(usize, usize)> {
        let bakery = &bakery;
        let customers: Vec<_> = (0..bakery.config.customers)
            .map(|customer| {
                thread::Builder::new()
                    .name(format!("customer-{customer}"))
                    .spawn_scoped(s, move || bakery.customer(customer))
            })
            .collect();
        let bakers: Vec<_> = (0..bakery.config.bakers)
            .map(|baker| {
                thread::Builder::new()
                    .name(format!("baker-{baker}"))
                    .spawn_scoped(s, move || bakery.baker(baker))
            })
            .collect();

        let mut failure = None;
        let mut produced = 0;
        for (baker, handle) in bakers.into_iter().enumerate() {
            match join_task(format!("baker-{baker}"), handle) {
                Ok(count) => produced += count,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        // One marker per spawned customer; a customer that already died just
        // leaves its marker behind in the basket.
        let spawned = customers.iter().filter(|handle| handle.is_ok()).count();
        for _ in 0..spawned {
            bakery.basket.put(Delivery::Closed);
        }
        debug!(customers = spawned, "bakery closing");

        let mut consumed = 0;
        for (customer, handle) in customers.into_iter().enumerate() {
            match join_task(format!("customer-{customer}"), handle) {
                Ok(count) => consumed += count,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        failure.map_or(Ok((produced, consumed)), Err)
    })?;

    let elapsed = started.elapsed();
    let remaining = bakery.basket.len();
    let high_water = bakery.basket.high_water();
    let mut deliveries = bakery
        .deliveries
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    deliveries.sort_unstable_by_key(|(ticket, _)| *ticket);
    let deliveries = deliveries
        .into_iter()
        .map(|(_, consumption)| consumption)
        .collect();
    info!(produced, consumed, remaining, ?elapsed, "bakery closed");

    Ok(BakeryReport {
        capacity: DEFAULT_CAPACITY,
        produced,
        consumed,
        remaining,
        high_water,
        elapsed,
        deliveries,
    })
}
