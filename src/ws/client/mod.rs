mod inner;

pub use inner::{ConnectGatewayError, ConnectionState, RunError};

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use serde_json::Value;
use snafu::prelude::*;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite as websocket;

use super::message::{Frame, OpCode, RequestGuildMembers, StatusUpdate};
use crate::{
    api::types::GatewayURLInfo, config::Config, ratelimit::RateLimiter, router::EventRouter,
};
use inner::{error, Driver, DriverChannels, StateCell};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

const OUTBOUND_QUEUE_SIZE: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn admit(check: impl Fn() -> Duration, what: &str) {
    loop {
        let wait = check();
        if wait.is_zero() {
            return;
        }
        log::debug!("{} limited, wait {:?}", what, wait);
        tokio::time::sleep(wait).await;
    }
}

#[derive(Debug)]
struct Shared {
    token: String,
    config: crate::config::GatewayConfig,
    limiter: Arc<RateLimiter>,
    state: Arc<StateCell>,
    frames: mpsc::Sender<Frame>,
    shutdown: watch::Sender<bool>,
    channels: Mutex<Option<DriverChannels>>,
    driver: Mutex<Option<JoinHandle<Result<(), RunError>>>>,
}

/// Gateway websocket client.
///
/// One background task owns the socket, runs the identify/resume handshake,
/// heartbeats and reconnects. This handle only queues outbound frames and
/// observes connection state. Cloning is cheap, all clones control the same
/// connection.
#[derive(Debug, Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client that is not connected yet
    pub fn new(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        let (frames, frames_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                token: config.token.clone(),
                config: config.gateway.clone(),
                limiter,
                state: Arc::new(StateCell::default()),
                frames,
                shutdown,
                channels: Mutex::new(Some(DriverChannels {
                    frames: frames_rx,
                    shutdown: shutdown_rx,
                })),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Start connecting to `gateway` in background, dispatch events to `router`.
    ///
    /// This returns once the connection task is started, use [`Client::wait`]
    /// or [`Client::subscribe`] to follow it. A client can only be connected once.
    pub fn connect(
        &self,
        gateway: GatewayURLInfo,
        router: Arc<dyn EventRouter>,
    ) -> Result<(), RunError> {
        ensure!(self.state() == ConnectionState::Created, error::AlreadyStarted);

        let channels = lock(&self.shared.channels)
            .take()
            .context(error::AlreadyStarted)?;

        self.shared.state.set(ConnectionState::Initialized);

        let driver = Driver::new(
            Arc::clone(&self.shared.state),
            channels,
            router,
            self.shared.token.clone(),
            self.shared.config.clone(),
            gateway,
        );

        lock(&self.shared.driver).replace(tokio::spawn(driver.run()));

        Ok(())
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Rate limiter used for outbound frames
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    /// Queue a frame for sending, waiting for rate limiter admission first.
    ///
    /// Heartbeat, identify and resume frames skip the frame limiter, status
    /// updates also wait on the presence limiter. Returns false and sends
    /// nothing if the connection is not started or already ended. Frames are
    /// written once the session is ready.
    pub async fn send(&self, op: OpCode, payload: Value) -> bool {
        if !self.state().accepts_frames() {
            log::debug!(
                "Drop {} frame, connection is {:?}",
                op.name(),
                self.state()
            );
            return false;
        }

        if op == OpCode::StatusUpdate {
            admit(|| self.shared.limiter.check_presence_update_limit(), "Presence update").await;
        }

        if !op.is_protocol_critical() {
            admit(|| self.shared.limiter.check_gateway_frame_limit(), "Gateway frame").await;
        }

        if !self.state().accepts_frames() {
            return false;
        }

        self.shared.frames.send(Frame::new(op, payload)).await.is_ok()
    }

    async fn send_typed<T: Serialize>(&self, op: OpCode, data: &T) -> bool {
        match serde_json::to_value(data) {
            Ok(payload) => self.send(op, payload).await,
            Err(err) => {
                log::warn!("Encode {} frame failed: {}", op.name(), err);
                false
            }
        }
    }

    /// Update presence of current user
    pub async fn update_presence(&self, presence: &StatusUpdate) -> bool {
        self.send_typed(OpCode::StatusUpdate, presence).await
    }

    /// Ask server to send members of a guild as dispatch events
    pub async fn request_guild_members(&self, query: &RequestGuildMembers) -> bool {
        self.send_typed(OpCode::RequestGuildMembers, query).await
    }

    /// Close the connection and wait for the background task to finish
    pub async fn disconnect(&self) -> Result<(), RunError> {
        match self.state() {
            ConnectionState::Created => {
                self.shared.state.set(ConnectionState::Disconnected);
                lock(&self.shared.channels).take();
                return Ok(());
            }
            state if state.is_terminal() => return Ok(()),
            _ => {}
        }

        log::info!("Disconnect gateway");

        self.shared.state.set(ConnectionState::Disconnecting);
        self.shared.shutdown.send_replace(true);

        self.wait().await
    }

    /// Wait until the connection ends.
    ///
    /// Returns `Ok` after a requested disconnect and [`RunError::Dead`] when the
    /// connection gave up reconnecting.
    pub async fn wait(&self) -> Result<(), RunError> {
        let handle = lock(&self.shared.driver).take();
        if let Some(handle) = handle {
            return handle.await.context(error::DriverStopped)?;
        }

        if self.state() == ConnectionState::Created {
            return Ok(());
        }

        let mut state = self.subscribe();
        loop {
            if state.borrow_and_update().is_terminal() {
                break;
            }
            if state.changed().await.is_err() {
                break;
            }
        }

        match self.state() {
            ConnectionState::Dead => error::Dead {
                failures: self.shared.config.failure_threshold,
            }
            .fail(),
            _ => Ok(()),
        }
    }
}
