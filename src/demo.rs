use crate::{
    bakery::{self, BakeryConfig},
    counter::{self, CounterConfig},
    error::Result,
    pool::{self, PoolConfig, DEFAULT_ITEM_DURATION},
    table::{self, TableConfig},
};

pub fn race_condition() -> Result<()> {
    println!("=== Race condition vs. synchronization ===");
    let config = CounterConfig::default();
    let report = counter::compare(&config)?;

    println!(
        "{} threads x {} increments, expected {}",
        config.tasks, config.increments_per_task, report.expected
    );
    println!("  without lock: {}", report.unprotected);
    if report.lost_updates() > 0 {
        println!("    race condition: {} updates lost", report.lost_updates());
    } else {
        println!("    no updates lost this time, the code is still unsafe");
    }
    println!("  with lock:    {}", report.protected);
    Ok(())
}

pub fn producer_consumer() -> Result<()> {
    println!("=== Bakery: producer/consumer over a bounded basket ===");
    let report = bakery::run(BakeryConfig::default())?;

    println!("  items produced:     {}", report.produced);
    println!("  items consumed:     {}", report.consumed);
    println!("  items left:         {}", report.remaining);
    println!(
        "  fullest basket:     {}/{}",
        report.high_water, report.capacity
    );
    println!("  time:               {:.2}s", report.elapsed.as_secs_f64());
    Ok(())
}

pub fn dining_philosophers() -> Result<()> {
    println!("=== Dining philosophers: lower-numbered fork first ===");
    let report = table::run(TableConfig::default())?;

    for (seat, meals) in report.meals_per_seat.iter().enumerate() {
        println!("  philosopher {seat}: {meals} meals");
    }
    println!("  total meals: {}", report.total_meals);
    println!("  time:        {:.2}s", report.elapsed.as_secs_f64());
    Ok(())
}

pub fn thread_pool() -> Result<()> {
    println!("=== Worker pool vs. sequential execution ===");
    let config = PoolConfig::default();
    let items = pool::default_backlog(DEFAULT_ITEM_DURATION);
    let comparison = pool::compare(&items, &config)?;

    println!("  tasks:      {}", items.len());
    println!("  workers:    {}", config.workers);
    println!(
        "  sequential: {:.2}s",
        comparison.sequential.elapsed.as_secs_f64()
    );
    println!(
        "  parallel:   {:.2}s",
        comparison.parallel.elapsed.as_secs_f64()
    );
    println!("  speedup:    {:.2}x", comparison.speedup());
    println!("  efficiency: {:.1}%", comparison.efficiency());
    for (worker, count) in comparison.parallel.utilization() {
        println!("  worker-{worker}: {count} tasks");
    }
    Ok(())
}
