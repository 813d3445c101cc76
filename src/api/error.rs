use std::time::Duration;

use snafu::prelude::*;

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// bot token is invalid(contains invalid character that cant be send in HTTP header)
    #[snafu(display("bot token {token} is invalid"))]
    TokenInvalid {
        /// input token
        token: String,
    },

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    ClientCreateFailed {
        /// source error
        source: reqwest::Error,
    },

    /// build api request failed
    #[snafu(display("build request failed: {source}"))]
    BuildRequestFailed {
        /// source error
        source: reqwest::Error,
    },

    /// send api request or read its response failed, includes timeouts
    #[snafu(display("{} url {url} failed: {source}", method.as_str()))]
    RequestFailed {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// server answered 304 Not Modified
    #[snafu(display("{} url {url} not modified: {message}", method.as_str()))]
    NotModified {
        /// http method
        method: reqwest::Method,
        /// request url
        url: String,
        /// server message
        message: String,
    },

    /// server answered 429, limiter state is already updated when this returned
    #[snafu(display(
        "{} url {url} rate limited{}, retry after {retry_after:?}",
        method.as_str(),
        if *global { " globally" } else { "" }
    ))]
    RateLimited {
        /// http method
        method: reqwest::Method,
        /// request url
        url: String,
        /// the limit applies to every endpoint
        global: bool,
        /// server suggested wait
        retry_after: Duration,
    },

    /// http response of api request is not success(2xx)
    #[snafu(display(
        "{} url {url} got http status code {status_code}: {message}",
        method.as_str()
    ))]
    HTTPStatusNotOK {
        /// http method
        method: reqwest::Method,
        /// request url
        url: String,
        /// received http status code
        status_code: reqwest::StatusCode,
        /// server message, or raw body if it is not a json error object
        message: String,
    },

    /// parse response body of api request as target json type failed
    #[snafu(display("parse response body {body:?} failed: {source}"))]
    ParseBodyFailed {
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },

    /// the client is stopped, no request was sent
    #[snafu(display("api client is stopped"))]
    Stopped,

    /// background worker running an async call panicked
    #[snafu(display("async api call worker failed: {source}"))]
    TaskFailed {
        /// source error
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// http status code the server answered with, if any
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::NotModified { .. } => Some(reqwest::StatusCode::NOT_MODIFIED),
            Self::RateLimited { .. } => Some(reqwest::StatusCode::TOO_MANY_REQUESTS),
            Self::HTTPStatusNotOK { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Check if this error is a 429 response
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
