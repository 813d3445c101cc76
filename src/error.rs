//! library error types

use snafu::prelude::*;

use super::api::Error as APIError;
use super::ws::RunError;

/// library result type
pub type Result<T> = std::result::Result<T, Error>;

/// library error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Call REST api failed
    #[snafu(display("call api failed: {source}"))]
    CallAPIFailed {
        /// source error
        source: APIError,
    },

    /// Received invalid websocket gateway url address
    #[snafu(display("invalid gateway url {url}"))]
    InvalidGatewayURL {
        /// received url
        url: String,
        /// source error
        source: crate::api::types::ParseGatewayURLError,
    },

    /// Gateway connection ended with error, [`RunError::Dead`] is fatal and not retryable
    #[snafu(display("run gateway connection failed: {source}"))]
    RunGatewayFailed {
        /// source error
        source: RunError,
    },

    /// Token env var not set
    #[snafu(display("no token in env var {var}: {source}"))]
    MissingToken {
        /// env var name
        var: String,
        /// source error
        source: std::env::VarError,
    },
}

impl Error {
    /// Check if the gateway connection gave up after too many failures
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            Self::RunGatewayFailed {
                source: RunError::Dead { .. }
            }
        )
    }
}
