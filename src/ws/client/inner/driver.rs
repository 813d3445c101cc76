use std::{future, sync::Arc, time::Duration};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use snafu::prelude::*;
use tokio::{
    sync::{mpsc, watch},
    task::JoinError,
    time::Instant,
};

use super::{
    gateway,
    heartbeat::{HeartbeatMonitor, Pulse},
    protocol::{CloseOutcome, Handshake, Protocol},
    state::{ConnectionState, StateCell},
};
use crate::{
    api::types::GatewayURLInfo,
    config::GatewayConfig,
    router::EventRouter,
    ws::message::{
        ConnectionProperties, Frame, Identify, Message, MessageStreamSink, MessageStreamSinkError,
        Resume,
    },
};

type FrameSink = SplitSink<MessageStreamSink, Frame>;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

fn heartbeat_interval(millis: u64) -> Duration {
    let interval = Duration::from_millis(millis);
    if interval < MIN_HEARTBEAT_INTERVAL {
        log::warn!(
            "Protocol error: heartbeat interval {:?} in hello, use {:?}",
            interval,
            MIN_HEARTBEAT_INTERVAL
        );
        MIN_HEARTBEAT_INTERVAL
    } else {
        interval
    }
}

/// Error when running gateway client
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum RunError {
    /// client is already connected once, a client can only be connected one time
    #[snafu(display("gateway client already started"))]
    AlreadyStarted,

    /// too many abnormal closes in a short time, the connection gives up
    #[snafu(display("gateway connection dead after {failures} failures"))]
    Dead {
        /// failures counted in the last window
        failures: u32,
    },

    /// driver task panicked or was aborted
    #[snafu(display("gateway driver task stopped: {source}"))]
    DriverStopped {
        /// source error
        source: JoinError,
    },
}

#[derive(Debug)]
enum SessionEnd {
    /// disconnect requested by owner
    Disconnect,
    /// server sent op 7
    ReconnectRequested,
    /// socket broken, closed by server or heartbeat timed out
    Lost { close_code: Option<u16> },
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

/// Channel ends the driver task works with
#[derive(Debug)]
pub(crate) struct DriverChannels {
    pub frames: mpsc::Receiver<Frame>,
    pub shutdown: watch::Receiver<bool>,
}

/// The task owning the gateway socket.
///
/// It is the only place protocol state and session are changed, apart from
/// the disconnect request of the client.
pub(crate) struct Driver {
    protocol: Protocol,
    heartbeat: HeartbeatMonitor,
    pulses: mpsc::Receiver<Pulse>,
    frames: mpsc::Receiver<Frame>,
    shutdown: watch::Receiver<bool>,
    sequence: watch::Sender<Option<u64>>,
    router: Arc<dyn EventRouter>,
    token: String,
    config: GatewayConfig,
    gateway: GatewayURLInfo,
    reconnect_delay: Duration,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("protocol", &self.protocol)
            .field("gateway", &self.gateway)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

impl Driver {
    pub fn new(
        state: Arc<StateCell>,
        channels: DriverChannels,
        router: Arc<dyn EventRouter>,
        token: String,
        config: GatewayConfig,
        gateway: GatewayURLInfo,
    ) -> Self {
        let (sequence, sequence_rx) = watch::channel(None);
        let (pulse_tx, pulses) = mpsc::channel(4);

        Self {
            protocol: Protocol::new(state, &config),
            heartbeat: HeartbeatMonitor::new(sequence_rx, pulse_tx),
            pulses,
            frames: channels.frames,
            shutdown: channels.shutdown,
            sequence,
            router,
            token,
            reconnect_delay: config.reconnect_delay_start,
            config,
            gateway,
        }
    }

    pub async fn run(mut self) -> Result<(), RunError> {
        let url = self.gateway.url();

        log::info!("Gateway driver start: {}", url);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.protocol.begin_attempt();

            let connected = tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => None,
                connected = gateway::connect(url.as_str()) => Some(connected),
            };

            let end = match connected {
                None => SessionEnd::Disconnect,
                Some(Ok(ws)) => self.serve(MessageStreamSink::new(ws)).await,
                Some(Err(err)) => {
                    log::warn!("{}", err);
                    SessionEnd::Lost { close_code: None }
                }
            };

            self.heartbeat.pause();

            match end {
                SessionEnd::Disconnect => break,
                SessionEnd::ReconnectRequested => {
                    log::info!("Server asked to reconnect");
                    self.protocol.on_reconnect_request();
                }
                SessionEnd::Lost { close_code } => {
                    let outcome = self.protocol.on_connection_lost(Instant::now(), close_code);
                    self.publish_sequence();

                    if outcome == CloseOutcome::Dead {
                        self.heartbeat.stop().await;
                        return error::Dead {
                            failures: self.protocol.failures().count(),
                        }
                        .fail();
                    }

                    let delay = self.next_reconnect_delay();
                    log::info!("Gateway connection lost, reconnect in {:?}", delay);

                    tokio::select! {
                        biased;

                        _ = shutdown_requested(&mut self.shutdown) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.heartbeat.stop().await;
        self.protocol.on_disconnected();

        log::info!("Gateway driver stopped");

        Ok(())
    }

    fn next_reconnect_delay(&mut self) -> Duration {
        let delay = self.reconnect_delay;
        self.reconnect_delay = (delay * 2).min(self.config.reconnect_delay_max);
        delay
    }

    fn publish_sequence(&self) {
        let last = self.protocol.session().last_sequence;
        self.sequence
            .send_replace(if last == 0 { None } else { Some(last) });
    }

    async fn serve(&mut self, conn: MessageStreamSink) -> SessionEnd {
        // pulses of last connection are meaningless now
        while self.pulses.try_recv().is_ok() {}

        let (mut sink, mut stream) = conn.split();
        let mut handshake_at: Option<Instant> = None;

        loop {
            let ready = self.protocol.state() == ConnectionState::Ready;

            let end = tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => {
                    if let Err(err) = sink.close().await {
                        log::debug!("Close gateway socket failed: {}", err);
                    }
                    Some(SessionEnd::Disconnect)
                }

                Some(pulse) = self.pulses.recv() => match pulse {
                    Pulse::Beat { sequence } => {
                        Self::write(&mut sink, Message::Heartbeat(sequence)).await
                    }
                    Pulse::Timeout => {
                        log::warn!("Heartbeat ack timeout, treat connection as lost");
                        Some(SessionEnd::Lost { close_code: None })
                    }
                },

                _ = sleep_until(handshake_at) => {
                    handshake_at = None;
                    self.handshake(&mut sink).await
                }

                Some(frame) = self.frames.recv(), if ready => {
                    log::trace!("Send frame op {}", frame.op);
                    Self::write_frame(&mut sink, frame).await
                }

                message = stream.next() => match message {
                    None => {
                        log::warn!("Gateway stream ended");
                        Some(SessionEnd::Lost { close_code: None })
                    }
                    Some(Err(err)) if err.is_fatal() => {
                        log::warn!("Gateway stream broken: {}", err);
                        Some(SessionEnd::Lost { close_code: err.close_code() })
                    }
                    Some(Err(err)) => {
                        log::warn!("Drop bad frame: {}", err);
                        None
                    }
                    Some(Ok(message)) => self.handle(message, &mut sink, &mut handshake_at).await,
                },
            };

            if let Some(end) = end {
                return end;
            }
        }
    }

    async fn handle(
        &mut self,
        message: Message,
        sink: &mut FrameSink,
        handshake_at: &mut Option<Instant>,
    ) -> Option<SessionEnd> {
        log::trace!("Receive {} message", message.type_name());

        match message {
            Message::Hello(hello) => {
                let interval = heartbeat_interval(hello.heartbeat_interval);
                log::debug!("Hello received, heartbeat interval {:?}", interval);
                self.heartbeat.start(interval);
                *handshake_at = None;
                self.handshake(sink).await
            }
            Message::HeartbeatAck => {
                self.heartbeat.heartbeat_ack();
                None
            }
            Message::Heartbeat(_) => {
                let sequence = *self.sequence.borrow();
                Self::write(sink, Message::Heartbeat(sequence)).await
            }
            Message::Dispatch(event) => {
                if self.protocol.on_dispatch(&event) {
                    self.reconnect_delay = self.config.reconnect_delay_start;
                }
                self.sequence.send_replace(Some(event.sn));
                self.router.dispatch(Arc::new(event)).await;
                None
            }
            Message::Reconnect => Some(SessionEnd::ReconnectRequested),
            Message::InvalidSession(resumable) => {
                log::warn!("Invalid session, resumable: {}", resumable);
                self.protocol.on_invalid_session(resumable);
                self.publish_sequence();
                *handshake_at = Some(Instant::now() + self.config.invalid_session_delay);
                None
            }
            other => {
                log::debug!("Ignore unexpected {} message", other.type_name());
                None
            }
        }
    }

    async fn handshake(&mut self, sink: &mut FrameSink) -> Option<SessionEnd> {
        let message = match self.protocol.on_hello() {
            Handshake::Identify => {
                log::info!("Identify new session");
                Message::Identify(Box::new(Identify {
                    token: self.token.clone(),
                    properties: ConnectionProperties::default(),
                    compress: self.config.compress,
                    large_threshold: self.config.large_threshold,
                    shard: self.config.shard,
                    presence: None,
                }))
            }
            Handshake::Resume { session_id, seq } => {
                log::info!("Resume session {} from sequence {}", session_id, seq);
                Message::Resume(Resume {
                    token: self.token.clone(),
                    session_id,
                    seq,
                })
            }
        };

        Self::write(sink, message).await
    }

    async fn write(sink: &mut FrameSink, message: Message) -> Option<SessionEnd> {
        match message.encode() {
            Ok(frame) => Self::write_frame(sink, frame).await,
            Err(err) => {
                log::warn!("Encode {} message failed: {}", message.type_name(), err);
                None
            }
        }
    }

    async fn write_frame(sink: &mut FrameSink, frame: Frame) -> Option<SessionEnd> {
        match sink.send(frame).await {
            Ok(()) => None,
            Err(err) => Self::write_failed(err),
        }
    }

    fn write_failed(err: MessageStreamSinkError) -> Option<SessionEnd> {
        if err.is_fatal() {
            log::warn!("Write to gateway failed: {}", err);
            Some(SessionEnd::Lost {
                close_code: err.close_code(),
            })
        } else {
            log::warn!("Drop outbound frame: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn driver() -> Driver {
        let (_frames_tx, frames) = mpsc::channel(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        Driver::new(
            Arc::new(StateCell::default()),
            DriverChannels { frames, shutdown },
            Arc::new(crate::router::Router::default()),
            "token".to_string(),
            GatewayConfig::default(),
            "wss://gateway.example.com".parse().unwrap(),
        )
    }

    #[test]
    fn test_hello_interval_has_floor() {
        assert_eq!(heartbeat_interval(0), MIN_HEARTBEAT_INTERVAL);
        assert_eq!(heartbeat_interval(41250), Duration::from_millis(41250));
    }

    #[tokio::test]
    async fn test_reconnect_delay_doubles_until_cap() {
        let mut driver = driver();

        let delays: Vec<_> = (0..7).map(|_| driver.next_reconnect_delay()).collect();

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 30, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect::<Vec<_>>()
        );
    }
}
