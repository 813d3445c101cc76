//! Events carried by [Dispatch](super::message::Message::Dispatch) messages.

use serde_json::Value;

use super::message::Ready;

/// Dispatched event, payload decoding is left to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// sequence number
    pub sn: u64,
    /// event type, the `t` field
    pub kind: String,
    /// event payload
    pub data: Value,
}

impl Event {
    /// Parse payload as ready event, `None` for other event types
    pub fn ready(&self) -> Option<Ready> {
        if self.kind != "READY" {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Check if this is the resumed event
    pub fn is_resumed(&self) -> bool {
        self.kind == "RESUMED"
    }
}
