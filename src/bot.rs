use std::sync::Arc;

use snafu::prelude::*;

use crate::{
    api::{self, types::GatewayURLInfo},
    config::Config,
    error,
    filter::Filter,
    ratelimit::RateLimiter,
    router::Router,
    subscriber::{Context, Subscriber},
    ws, Result,
};

/// Bot instance, owns one REST channel and one gateway connection sharing a
/// rate limiter, plus the subscriber list.
#[derive(Debug)]
pub struct Bot {
    config: Config,
    api: api::Client,
    gateway: ws::Client,
    router: Router,
}

impl Bot {
    /// Create new bot instance with config
    pub fn new(config: Config) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        let api = api::Client::new(&config, Arc::clone(&limiter)).context(error::CallAPIFailed)?;
        let gateway = ws::Client::new(&config, limiter);

        log::info!("Create api and gateway client success");

        Ok(Self {
            config,
            api,
            gateway,
            router: Router::default(),
        })
    }

    /// Create new bot instance using bot token and default config
    pub fn from_token<S: Into<String>>(token: S) -> Result<Self> {
        Self::new(Config::new(token))
    }

    /// REST channel
    pub fn api(&self) -> &api::Client {
        &self.api
    }

    /// Gateway connection
    pub fn gateway(&self) -> &ws::Client {
        &self.gateway
    }

    /// Handles given to subscribers
    pub fn context(&self) -> Context {
        Context {
            api: self.api.clone(),
            gateway: self.gateway.clone(),
        }
    }

    /// Register a subscriber for events passing `filter`
    pub async fn subscribe<F, S>(&mut self, filter: F, mut subscriber: S)
    where
        F: Filter + Send + Sync + 'static,
        S: Subscriber + Send + Sync + 'static,
    {
        subscriber.on_loaded(self.context()).await;
        self.router.route(filter, subscriber);
    }

    async fn fetch_gateway(&self) -> Result<GatewayURLInfo> {
        let gateway_url = self.api.gateway_url().await.context(error::CallAPIFailed)?;

        log::debug!("Got gateway url: {}", gateway_url);

        let info: GatewayURLInfo = gateway_url
            .parse()
            .with_context(|_| error::InvalidGatewayURL { url: &gateway_url })?;

        Ok(info.version(self.config.gateway.version))
    }

    /// Connect and run until disconnected.
    ///
    /// A dead connection is returned as an error, see [`crate::Error::is_dead`].
    pub async fn run(self) -> Result<()> {
        log::info!("Getting gateway url...");

        let gateway = self.fetch_gateway().await?;

        log::info!(
            "Connecting gateway with {} subscribers",
            self.router.len()
        );

        self.gateway
            .connect(gateway, Arc::new(self.router))
            .context(error::RunGatewayFailed)?;

        let result = self.gateway.wait().await.context(error::RunGatewayFailed);

        self.api.stop();

        match result {
            Ok(()) => log::info!("Gateway disconnected"),
            Err(ref err) => log::warn!("Gateway stopped: {}", err),
        }

        result
    }
}
