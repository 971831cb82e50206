//! HTTP networking module
//!
//! Provides the HTTP client used by operations that query remote backends.

mod client;
mod user_agent;

pub use client::{HttpClient, HttpResponse};
pub use user_agent::generate_user_agent;
