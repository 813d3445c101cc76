//! HTTP API response types

use std::{fmt::Display, str::FromStr, time::Duration};

use serde::Deserialize;
use snafu::prelude::*;

// a day, anything larger from the server is garbage
const MAX_SERVER_SECONDS: f64 = 86400.0;

/// Seconds reported by the server as duration, clamped to a day
pub(crate) fn server_seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value.min(MAX_SERVER_SECONDS))
    } else {
        Duration::ZERO
    }
}

/// Error object returned with non-success status
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    /// platform error code
    #[serde(default)]
    pub code: i64,
    /// error message
    #[serde(default)]
    pub message: String,
}

/// Body of a 429 response
#[derive(Debug, Default, Deserialize)]
pub struct RateLimitedBody {
    /// the limit applies to every endpoint
    #[serde(default)]
    pub global: bool,
    /// wait before retry, in milliseconds
    #[serde(default)]
    pub retry_after: f64,
    /// error message
    #[serde(default)]
    pub message: String,
}

impl RateLimitedBody {
    /// retry_after as duration
    pub fn retry_after(&self) -> Duration {
        server_seconds(self.retry_after / 1000.0)
    }
}

/// data type for api /gateway/bot
#[derive(Debug, Deserialize)]
pub struct GatewayBotData {
    /// gateway url
    pub url: String,
    /// recommended shard count
    #[serde(default)]
    pub shards: Option<u32>,
}

/// Parse string as gateway url error
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(parse_gateway_url_error_variant),
    context(suffix(false))
)]
pub enum ParseGatewayURLError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the gateway url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },

    /// the `v` query is not a number
    #[snafu(display("the gateway url {s} has invalid version"))]
    InvalidVersion {
        /// the url
        s: String,
        /// source error
        source: std::num::ParseIntError,
    },
}

/// parsed gateway url
#[derive(Debug, Clone)]
pub struct GatewayURLInfo {
    /// base url, without protocol query
    pub base: url::Url,
    /// gateway protocol version
    pub version: u8,
    /// payload encoding, only json is supported
    pub encoding: String,
}

impl GatewayURLInfo {
    /// construct final url
    pub fn url(&self) -> url::Url {
        let mut u = self.base.clone();
        u.set_query(None);

        {
            let mut query = u.query_pairs_mut();
            query.append_pair("v", &format!("{}", self.version));
            query.append_pair("encoding", &self.encoding);
        }

        u
    }

    /// Replace protocol version
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}

impl FromStr for GatewayURLInfo {
    type Err = ParseGatewayURLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s)
            .with_context(|_| parse_gateway_url_error_variant::InvalidURL { s: s.to_string() })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            parse_gateway_url_error_variant::InvalidSchema {
                s,
                schema: url.scheme(),
            }
        );

        ensure!(
            url.host().is_some(),
            parse_gateway_url_error_variant::NoHost { s }
        );

        let version = match url.query_pairs().find(|(key, _)| key == "v") {
            Some((_, v)) => v
                .parse()
                .with_context(|_| parse_gateway_url_error_variant::InvalidVersion { s })?,
            None => 6,
        };

        Ok(GatewayURLInfo {
            base: url,
            version,
            encoding: "json".to_string(),
        })
    }
}

impl Display for GatewayURLInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url().fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_gateway_url() {
        let info: GatewayURLInfo = "wss://gateway.example.com".parse().unwrap();
        assert_eq!(info.version, 6);
        assert_eq!(
            info.url().as_str(),
            "wss://gateway.example.com/?v=6&encoding=json"
        );
    }

    #[test]
    fn test_parse_gateway_url_keeps_version() {
        let info: GatewayURLInfo = "ws://127.0.0.1:7777/?v=8&encoding=json"
            .parse()
            .unwrap();
        assert_eq!(info.version, 8);
        assert_eq!(info.base.port(), Some(7777));
    }

    #[test]
    fn test_parse_gateway_url_invalid_schema() {
        let err = "https://gateway.example.com"
            .parse::<GatewayURLInfo>()
            .unwrap_err();
        assert!(matches!(err, ParseGatewayURLError::InvalidSchema { .. }));
    }

    #[test]
    fn test_rate_limited_body_in_millis() {
        let body: RateLimitedBody =
            serde_json::from_str(r#"{"global": true, "retry_after": 2000, "message": "slow"}"#)
                .unwrap();
        assert!(body.global);
        assert_eq!(body.retry_after(), Duration::from_secs(2));
    }

    #[test]
    fn test_huge_retry_after_is_clamped() {
        let body: RateLimitedBody =
            serde_json::from_str(r#"{"global": true, "retry_after": 1e30}"#).unwrap();
        assert_eq!(body.retry_after(), Duration::from_secs(86400));

        assert_eq!(server_seconds(f64::NAN), Duration::ZERO);
        assert_eq!(server_seconds(-3.0), Duration::ZERO);
    }
}
