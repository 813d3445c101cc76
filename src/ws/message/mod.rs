//! Gateway websocket message types.

mod stream;
mod types;

pub use stream::{MessageStreamSink, MessageStreamSinkError};
pub use types::{
    Activity, ConnectionProperties, Hello, Identify, Ready, RequestGuildMembers, Resume,
    StatusUpdate,
};

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use miniz_oxide::inflate::{self, TINFLStatus};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use super::event::Event;

/// Error when parse binary data as message
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)), module(error), context(suffix(false)))]
pub enum ParseMessageError {
    /// Decompress data failed
    #[snafu(display("decompress message failed: {status:?}"))]
    DecompressFailed {
        /// data for decode
        data: Bytes,
        /// decompress error status code
        status: TINFLStatus,
    },

    /// data is not a valid json frame envelope
    #[snafu(display("parse json failed: {source:?}"))]
    ParseJSONFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// frame has an unknown op code
    #[snafu(display("message has unknown op code {op}"))]
    UnknownOpCode {
        /// op number
        op: u8,
    },

    /// dispatch frame without s(sequence) field
    #[snafu(display("dispatch message has no sequence"))]
    NoSequence,

    /// dispatch frame without t(event type) field
    #[snafu(display("dispatch message has no event type"))]
    NoEventType,

    /// frame data is not valid for its op code
    #[snafu(display("parse to {type_name} message failed: {source}"))]
    ParseJSONToTypedMessageFailed {
        /// type name
        type_name: String,
        /// source error
        source: serde_json::Error,
    },
}

/// Gateway op codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// event dispatch, server -> client
    Dispatch,
    /// heartbeat, both directions
    Heartbeat,
    /// identify, client -> server
    Identify,
    /// presence/status update, client -> server
    StatusUpdate,
    /// resume a session, client -> server
    Resume,
    /// server asks client to reconnect
    Reconnect,
    /// member query, client -> server
    RequestGuildMembers,
    /// session is invalid, server -> client
    InvalidSession,
    /// first frame after connect, server -> client
    Hello,
    /// heartbeat ack, server -> client
    HeartbeatAck,
}

impl OpCode {
    /// op code from wire number
    pub fn from_number(op: u8) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::StatusUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    /// wire number
    pub fn number(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::StatusUpdate => 3,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
        }
    }

    /// name for logging
    pub fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "Dispatch",
            Self::Heartbeat => "Heartbeat",
            Self::Identify => "Identify",
            Self::StatusUpdate => "StatusUpdate",
            Self::Resume => "Resume",
            Self::Reconnect => "Reconnect",
            Self::RequestGuildMembers => "RequestGuildMembers",
            Self::InvalidSession => "InvalidSession",
            Self::Hello => "Hello",
            Self::HeartbeatAck => "HeartbeatAck",
        }
    }

    /// Frames needed to keep the protocol alive, not counted by the frame limiter
    pub fn is_protocol_critical(self) -> bool {
        matches!(self, Self::Heartbeat | Self::Identify | Self::Resume)
    }
}

/// Raw frame envelope as it is on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// op code number
    pub op: u8,
    /// payload
    #[serde(default)]
    pub d: Value,
    /// sequence, dispatch only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// event type, dispatch only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    /// Construct a client -> server frame
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op.number(),
            d,
            s: None,
            t: None,
        }
    }

    /// op code, `None` if unknown
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_number(self.op)
    }
}

/// Gateway protocol message
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Message {
    /// Event dispatch, server -> client
    Dispatch(Event),
    /// Heartbeat with last sequence, both directions
    Heartbeat(Option<u64>),
    /// Identify, client -> server
    Identify(Box<Identify>),
    /// Presence update, client -> server
    StatusUpdate(StatusUpdate),
    /// Resume, client -> server
    Resume(Resume),
    /// Reconnect request, server -> client
    Reconnect,
    /// Member query, client -> server
    RequestGuildMembers(RequestGuildMembers),
    /// Invalid session with resumable flag, server -> client
    InvalidSession(bool),
    /// Hello, server -> client
    Hello(Hello),
    /// Heartbeat ack, server -> client
    HeartbeatAck,
}

fn typed<T: DeserializeOwned>(op: OpCode, d: Value) -> Result<T, ParseMessageError> {
    serde_json::from_value(d).context(error::ParseJSONToTypedMessageFailed {
        type_name: op.name(),
    })
}

impl Message {
    /// Decode data to a message, `compressed` data is zlib inflated first
    pub fn decode(mut buff: Bytes, compressed: bool) -> Result<Self, ParseMessageError> {
        if compressed {
            buff = inflate::decompress_to_vec_zlib(&buff)
                .map_err(|e| ParseMessageError::DecompressFailed {
                    data: buff.clone(),
                    status: e,
                })?
                .into();
        }

        let frame: Frame =
            serde_json::from_slice(&buff).context(error::ParseJSONFailed { data: buff.clone() })?;

        Self::from_frame(frame)
    }

    /// Convert a raw frame to typed message
    pub fn from_frame(frame: Frame) -> Result<Self, ParseMessageError> {
        let op = frame
            .op_code()
            .context(error::UnknownOpCode { op: frame.op })?;

        let message = match op {
            OpCode::Dispatch => Self::Dispatch(Event {
                sn: frame.s.context(error::NoSequence)?,
                kind: frame.t.context(error::NoEventType)?,
                data: frame.d,
            }),
            OpCode::Heartbeat => Self::Heartbeat(typed(op, frame.d)?),
            OpCode::Identify => Self::Identify(Box::new(typed(op, frame.d)?)),
            OpCode::StatusUpdate => Self::StatusUpdate(typed(op, frame.d)?),
            OpCode::Resume => Self::Resume(typed(op, frame.d)?),
            OpCode::Reconnect => Self::Reconnect,
            OpCode::RequestGuildMembers => Self::RequestGuildMembers(typed(op, frame.d)?),
            OpCode::InvalidSession => {
                Self::InvalidSession(typed::<Option<bool>>(op, frame.d)?.unwrap_or_default())
            }
            OpCode::Hello => Self::Hello(typed(op, frame.d)?),
            OpCode::HeartbeatAck => Self::HeartbeatAck,
        };

        Ok(message)
    }

    /// encode to raw frame
    pub fn encode(&self) -> serde_json::Result<Frame> {
        let d = match self {
            Self::Dispatch(data) => {
                return Ok(Frame {
                    op: OpCode::Dispatch.number(),
                    d: data.data.clone(),
                    s: Some(data.sn),
                    t: Some(data.kind.clone()),
                })
            }
            Self::Heartbeat(sn) => serde_json::to_value(sn)?,
            Self::Identify(identify) => serde_json::to_value(identify)?,
            Self::StatusUpdate(status) => serde_json::to_value(status)?,
            Self::Resume(resume) => serde_json::to_value(resume)?,
            Self::RequestGuildMembers(query) => serde_json::to_value(query)?,
            Self::InvalidSession(resumable) => Value::Bool(*resumable),
            Self::Hello(hello) => serde_json::to_value(hello)?,
            Self::Reconnect | Self::HeartbeatAck => Value::Null,
        };

        Ok(Frame::new(self.op_code(), d))
    }

    /// get op code
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Dispatch(_) => OpCode::Dispatch,
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::StatusUpdate(_) => OpCode::StatusUpdate,
            Self::Resume(_) => OpCode::Resume,
            Self::Reconnect => OpCode::Reconnect,
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers,
            Self::InvalidSession(_) => OpCode::InvalidSession,
            Self::Hello(_) => OpCode::Hello,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
        }
    }

    /// get type name
    pub fn type_name(&self) -> &'static str {
        self.op_code().name()
    }
}
