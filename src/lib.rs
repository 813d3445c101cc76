//! # Cordial
//!
//! Gateway connection and rate limited REST client for chat platform bots.
//!
//! The gateway connection keeps one authenticated websocket session alive,
//! heartbeating, resuming and reconnecting as needed, and gives up after too
//! many failures in a short time. REST calls and gateway frames share one
//! [`RateLimiter`].

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod filter;
pub mod ratelimit;
pub mod router;
pub mod subscriber;
pub mod ws;

mod bot;
mod error;

pub use bot::Bot;
pub use config::Config;
pub use error::{Error, Result};
pub use ratelimit::RateLimiter;
