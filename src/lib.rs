//! MultiSearch-RS: race a query across many search operations
//!
//! Operations run concurrently under a concurrency cap. The first one to
//! succeed wins and the rest are told to stop; if every operation fails, the
//! most recently recorded failure is returned.

pub mod config;
pub mod metrics;
pub mod network;
pub mod operations;
pub mod race;

pub use config::Settings;
pub use operations::{search_fn, BoxedOperation, SearchOperation};
pub use race::{race, CancellationScope, Dispatcher, RaceError, RaceOutcome, RaceReport};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of operations allowed to execute at once
pub const DEFAULT_CONCURRENCY_CAP: usize = 10;

/// Default timeout for backend requests in seconds
pub const DEFAULT_TIMEOUT: u64 = 5;
