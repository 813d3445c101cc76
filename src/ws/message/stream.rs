use std::task::Poll;

use bytes::Bytes;
use futures_util::{ready, Sink, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::{Frame, Message, ParseMessageError};
use crate::ws::client::WebsocketClient;

/// Error when read/write message stream/sink
#[derive(Debug, Snafu)]
#[snafu(module(error), context(suffix(false)))]
pub enum MessageStreamSinkError {
    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },

    /// server closed the websocket
    #[snafu(display("websocket closed by server, code {code:?}: {reason}"))]
    Closed {
        /// close code, if server sent one
        code: Option<u16>,
        /// close reason
        reason: String,
    },

    /// parse frame data failed
    #[snafu(display("parse frame to message failed: {source}"))]
    ParseMessageFailed {
        /// source error
        source: ParseMessageError,
    },

    /// encode outbound frame failed
    #[snafu(display("encode frame failed: {source}"))]
    EncodeFailed {
        /// source error
        source: serde_json::Error,
    },
}

impl MessageStreamSinkError {
    /// Check if this error will make the stream/sink stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Websocket { .. } | Self::Closed { .. } => true,
            Self::ParseMessageFailed { .. } | Self::EncodeFailed { .. } => false,
        }
    }

    /// close code sent by server, if stream ended by a close frame
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Gateway websocket message stream/sink
///
/// Text frames are parsed directly, binary frames are zlib inflated first.
/// Websocket level ping/pong frames are skipped.
#[derive(Debug)]
pub struct MessageStreamSink {
    ws: WebsocketClient,
}

impl MessageStreamSink {
    /// Construct a new stream with underlying websocket connection.
    pub fn new(ws: WebsocketClient) -> Self {
        Self { ws }
    }
}

impl Stream for MessageStreamSink {
    type Item = Result<Message, MessageStreamSinkError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match ready!(self.ws.poll_next_unpin(cx)) {
                Some(frame) => frame.context(error::Websocket)?,
                None => return Poll::Ready(None),
            };

            let (buffer, compressed): (Bytes, bool) = match frame {
                websocket::Message::Text(text) => (text.into(), false),
                websocket::Message::Binary(data) => (data.into(), true),
                websocket::Message::Close(close) => {
                    let (code, reason) = close
                        .map(|c| (Some(u16::from(c.code)), c.reason.into_owned()))
                        .unwrap_or_default();
                    return Poll::Ready(Some(error::Closed { code, reason }.fail()));
                }
                _ => {
                    log::trace!("Skip websocket control frame");
                    continue;
                }
            };

            let result = Message::decode(buffer.clone(), compressed).map_err(|e| {
                log::trace!(
                    "Parse failed message data: {}",
                    std::str::from_utf8(&buffer).unwrap_or("<not-utf8-binary>")
                );
                MessageStreamSinkError::ParseMessageFailed { source: e }
            });

            return Poll::Ready(Some(result));
        }
    }
}

impl Sink<Frame> for MessageStreamSink {
    type Error = MessageStreamSinkError;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_ready_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let text = serde_json::to_string(&item).context(error::EncodeFailed)?;
        self.ws
            .start_send_unpin(websocket::Message::Text(text))
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_flush_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_close_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }
}
