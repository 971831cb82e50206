//! Race orchestration module
//!
//! Runs a set of operations concurrently under a concurrency cap and keeps
//! the first successful result. Remaining operations that have not started
//! yet are skipped once a winner exists.

mod error;
mod executor;
mod limiter;
mod models;
mod scope;
mod slot;

pub use error::RaceError;
pub use executor::{race, Dispatcher};
pub use limiter::{Admission, ConcurrencyLimiter};
pub use models::*;
pub use scope::{CancelOnDrop, CancelReason, CancellationScope};
pub use slot::{ErrorAggregator, ResultSlot};
