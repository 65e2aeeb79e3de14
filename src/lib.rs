//! Four small demonstrations of classic thread coordination: a counter that
//! loses updates without a lock, a bounded producer/consumer basket, dining
//! philosophers kept deadlock-free by ordered fork pick-up, and a worker pool
//! racing a sequential run over the same backlog.

pub mod bakery;
pub mod bounded_queue;
pub mod counter;
pub mod demo;
pub mod error;
pub mod jitter;
pub mod latch;
pub mod logging;
pub mod pool;
pub mod table;

pub use error::{Error, Result};
