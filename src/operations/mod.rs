//! Search operation module
//!
//! Defines the SearchOperation trait raced by the dispatcher, plus ready-made
//! operations built from closures or HTTP backends.

mod http;
mod traits;

pub use http::{HttpHit, HttpOperation, HttpOperationError};
pub use traits::*;
