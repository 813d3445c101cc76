//! HTTP api, the rate limited REST channel

mod client;
mod error;
mod pending;
mod route;
pub mod types;

pub use client::Client;
pub use error::Error;
pub use pending::{CallOutcome, PendingCall};

/// Result type for api module
pub type Result<T> = std::result::Result<T, Error>;
