//! Gateway websocket protocol client implement

pub(crate) mod client;
mod event;
pub mod message;

pub use client::{Client, ConnectGatewayError, ConnectionState, RunError};
pub use event::Event;
pub use message::{Message, OpCode};
