//! Client configuration

use std::time::Duration;

use snafu::prelude::*;

use crate::{error, Result};

static DEFAULT_API_BASE: &str = "https://discord.com/api/v6";

static TOKEN_ENV_VAR: &str = "BOT_TOKEN";

/// How the token is presented in the authorization header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// `Bot <token>`
    Bot,
    /// `Bearer <token>`, for oauth2 access tokens
    Bearer,
}

impl TokenType {
    /// authorization header scheme
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Bot => "Bot",
            Self::Bearer => "Bearer",
        }
    }
}

/// Limits enforced locally, without server signals
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// max outbound gateway frames per window
    pub gateway_frames: usize,
    /// max presence(status) updates per window
    pub presence_updates: usize,
    /// length of the sliding window
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            gateway_frames: 90,
            presence_updates: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// REST channel settings
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// api base url, requested endpoints are appended to it
    pub api_base: String,
    /// tcp/tls connect timeout
    pub connect_timeout: Duration,
    /// whole request timeout, including reading the body
    pub read_timeout: Duration,
    /// max concurrently running async calls
    pub workers: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            workers: 8,
        }
    }
}

/// Gateway connection settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// gateway protocol version, sent as `v` query parameter
    pub version: u8,
    /// ask server to zlib compress frames
    pub compress: bool,
    /// member count above which a guild is considered large
    pub large_threshold: u16,
    /// `[shard_id, shard_count]`
    pub shard: Option<[u32; 2]>,
    /// wait before re-identify/resume after an invalid session frame
    pub invalid_session_delay: Duration,
    /// first reconnect delay, doubled on every failed attempt
    pub reconnect_delay_start: Duration,
    /// reconnect delay cap
    pub reconnect_delay_max: Duration,
    /// abnormal closes in one window that make the connection dead
    pub failure_threshold: u32,
    /// length of the failure counting window
    pub failure_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: 6,
            compress: true,
            large_threshold: 250,
            shard: None,
            invalid_session_delay: Duration::from_millis(3500),
            reconnect_delay_start: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            failure_threshold: 10,
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Whole client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// auth token
    pub token: String,
    /// auth token type
    pub token_type: TokenType,
    /// REST settings
    pub rest: RestConfig,
    /// gateway settings
    pub gateway: GatewayConfig,
    /// local rate limit settings
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Default config with a bot token
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            token_type: TokenType::Bot,
            rest: RestConfig::default(),
            gateway: GatewayConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    /// Default config with bot token read from `BOT_TOKEN` env var
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_ENV_VAR).context(error::MissingToken {
            var: TOKEN_ENV_VAR,
        })?;

        Ok(Self::new(token))
    }

    /// Use an oauth2 bearer token instead of a bot token
    pub fn bearer(mut self) -> Self {
        self.token_type = TokenType::Bearer;
        self
    }

    /// Replace api base url
    pub fn api_base<S: Into<String>>(mut self, base: S) -> Self {
        self.rest.api_base = base.into();
        self
    }
}
