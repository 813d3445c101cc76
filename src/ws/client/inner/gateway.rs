use snafu::prelude::*;
use tokio_tungstenite as websocket;

use super::super::WebsocketClient;

/// Error when connect to websocket gateway
#[derive(Debug, Snafu)]
#[snafu(
    display("connect ws gateway {url} failed: {source}"),
    visibility(pub(crate)),
    module(error),
    context(suffix(false))
)]
pub struct ConnectGatewayError {
    /// connected url
    pub url: String,
    /// source error
    pub source: websocket::tungstenite::Error,
}

/// Open websocket to gateway, retry once immediately if first try failed
pub(crate) async fn connect(url: &str) -> Result<WebsocketClient, ConnectGatewayError> {
    log::debug!("Connecting gateway: {}", url);

    let mut conn_result = websocket::connect_async(url).await;
    if let Err(ref err) = conn_result {
        log::warn!("First try to connect gateway failed: {}, start second try", err);
        conn_result = websocket::connect_async(url).await
    }

    let (ws, _) = conn_result.context(error::ConnectGateway { url })?;

    log::debug!("Gateway connected");

    Ok(ws)
}
