use std::sync::Arc;

use tokio::time::Instant;

use super::state::{ConnectionState, FailureWindow, Session, StateCell};
use crate::{config::GatewayConfig, ws::Event};

/// close codes after which the session can't be resumed: invalid seq, session timeout
const NON_RESUMABLE_CLOSE_CODES: &[u16] = &[4007, 4009];

/// How to start a session on a fresh socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Handshake {
    Identify,
    Resume { session_id: String, seq: u64 },
}

/// What to do after a connection is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Reconnect,
    Dead,
}

/// Gateway protocol state machine, without any io.
///
/// Owned by the connection driver task, which is the only one feeding it.
#[derive(Debug)]
pub(crate) struct Protocol {
    state: Arc<StateCell>,
    session: Session,
    failures: FailureWindow,
}

impl Protocol {
    pub fn new(state: Arc<StateCell>, config: &GatewayConfig) -> Self {
        Self {
            state,
            session: Session::default(),
            failures: FailureWindow::new(config.failure_threshold, config.failure_window),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn failures(&self) -> &FailureWindow {
        &self.failures
    }

    /// A new socket is about to be opened
    pub fn begin_attempt(&mut self) {
        if self.session.resume_arguments().is_some() {
            self.state.set(ConnectionState::Resuming);
        } else {
            self.state.set(ConnectionState::Connecting);
        }
    }

    /// Hello received, choose identify or resume
    pub fn on_hello(&mut self) -> Handshake {
        match self.session.resume_arguments() {
            Some((session_id, seq)) => {
                let handshake = Handshake::Resume {
                    session_id: session_id.to_string(),
                    seq,
                };
                self.state.set(ConnectionState::Resuming);
                handshake
            }
            None => {
                self.state.set(ConnectionState::Connecting);
                Handshake::Identify
            }
        }
    }

    /// Record dispatch sequence, returns true if this event completed the handshake
    pub fn on_dispatch(&mut self, event: &Event) -> bool {
        self.session.last_sequence = event.sn;

        if let Some(ready) = event.ready() {
            log::info!("Session {} ready", ready.session_id);
            self.session.start(ready.session_id);
            return self.state.set(ConnectionState::Ready);
        }

        if event.is_resumed() {
            log::info!("Session resumed at sequence {}", event.sn);
            return self.state.set(ConnectionState::Ready);
        }

        false
    }

    /// Invalid session received, next handshake decided by `resumable`
    pub fn on_invalid_session(&mut self, resumable: bool) {
        if resumable {
            self.session.resumable = self.session.session_id.is_some();
        } else {
            log::info!("Session invalidated by server, will identify again");
            self.session.invalidate();
        }
    }

    /// Server asked for a reconnect, the session stays resumable
    pub fn on_reconnect_request(&mut self) {
        self.session.resumable = self.session.session_id.is_some();
        self.state.set(ConnectionState::Reconnecting);
    }

    /// Socket closed abnormally or heartbeat ack timed out
    pub fn on_connection_lost(&mut self, now: Instant, close_code: Option<u16>) -> CloseOutcome {
        if let Some(code) = close_code {
            if NON_RESUMABLE_CLOSE_CODES.contains(&code) {
                log::info!("Closed with code {}, session can't be resumed", code);
                self.session.invalidate();
            }
        }

        if self.failures.record(now) {
            log::warn!(
                "{} connection failures in window, give up",
                self.failures.count()
            );
            self.state.set(ConnectionState::Dead);
            return CloseOutcome::Dead;
        }

        log::debug!(
            "Connection failure {}/{} in window",
            self.failures.count(),
            self.failures.threshold()
        );

        self.state.set(ConnectionState::Reconnecting);
        CloseOutcome::Reconnect
    }

    /// The driver stopped on request
    pub fn on_disconnected(&mut self) {
        self.state.set(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn protocol() -> Protocol {
        let state = Arc::new(StateCell::default());
        state.set(ConnectionState::Initialized);
        Protocol::new(state, &GatewayConfig::default())
    }

    fn event(sn: u64, kind: &str, data: serde_json::Value) -> Event {
        Event {
            sn,
            kind: kind.to_string(),
            data,
        }
    }

    fn ready(protocol: &mut Protocol, session_id: &str) {
        protocol.begin_attempt();
        assert_eq!(protocol.on_hello(), Handshake::Identify);
        assert!(protocol.on_dispatch(&event(1, "READY", json!({ "session_id": session_id }))));
    }

    #[test]
    fn test_first_connect_identifies() {
        let mut protocol = protocol();

        protocol.begin_attempt();
        assert_eq!(protocol.state(), ConnectionState::Connecting);
        assert_eq!(protocol.on_hello(), Handshake::Identify);

        assert!(protocol.on_dispatch(&event(1, "READY", json!({ "session_id": "abc", "v": 6 }))));
        assert_eq!(protocol.state(), ConnectionState::Ready);
        assert_eq!(protocol.session().session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_sequence_follows_every_dispatch() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");

        for sn in [2, 3, 7, 8] {
            protocol.on_dispatch(&event(sn, "MESSAGE_CREATE", json!({})));
            assert_eq!(protocol.session().last_sequence, sn);
        }
    }

    #[test]
    fn test_reconnect_resumes_last_session() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");
        protocol.on_dispatch(&event(42, "MESSAGE_CREATE", json!({})));

        let outcome = protocol.on_connection_lost(Instant::now(), Some(1006));
        assert_eq!(outcome, CloseOutcome::Reconnect);
        assert_eq!(protocol.state(), ConnectionState::Reconnecting);

        protocol.begin_attempt();
        assert_eq!(protocol.state(), ConnectionState::Resuming);
        assert_eq!(
            protocol.on_hello(),
            Handshake::Resume {
                session_id: "abc".to_string(),
                seq: 42
            }
        );

        assert!(protocol.on_dispatch(&event(43, "RESUMED", json!(null))));
        assert_eq!(protocol.state(), ConnectionState::Ready);
        assert_eq!(protocol.session().session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_server_reconnect_request_keeps_session() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");

        protocol.on_reconnect_request();
        assert_eq!(protocol.state(), ConnectionState::Reconnecting);
        assert_eq!(protocol.failures().count(), 0);

        protocol.begin_attempt();
        assert!(matches!(protocol.on_hello(), Handshake::Resume { .. }));
    }

    #[test]
    fn test_non_resumable_invalid_session_identifies() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");

        protocol.on_invalid_session(false);
        assert_eq!(protocol.on_hello(), Handshake::Identify);
        assert_eq!(protocol.session().last_sequence, 0);
    }

    #[test]
    fn test_resumable_invalid_session_resumes() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");

        protocol.on_invalid_session(true);
        assert!(matches!(protocol.on_hello(), Handshake::Resume { .. }));
    }

    #[test]
    fn test_session_timeout_close_code_identifies() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");

        protocol.on_connection_lost(Instant::now(), Some(4009));
        protocol.begin_attempt();
        assert_eq!(protocol.state(), ConnectionState::Connecting);
        assert_eq!(protocol.on_hello(), Handshake::Identify);
    }

    #[test]
    fn test_tenth_failure_in_window_is_dead() {
        let mut protocol = protocol();
        ready(&mut protocol, "abc");

        let start = Instant::now();
        for i in 0..9 {
            let outcome = protocol.on_connection_lost(start + Duration::from_secs(i), None);
            assert_eq!(outcome, CloseOutcome::Reconnect);
            assert_eq!(protocol.state(), ConnectionState::Reconnecting);
            protocol.begin_attempt();
        }

        let outcome = protocol.on_connection_lost(start + Duration::from_secs(30), None);
        assert_eq!(outcome, CloseOutcome::Dead);
        assert_eq!(protocol.state(), ConnectionState::Dead);

        protocol.begin_attempt();
        assert_eq!(protocol.state(), ConnectionState::Dead);
    }
}
