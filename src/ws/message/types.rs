use serde::{Deserialize, Serialize};

/// Hello message data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Fields of ready event we care about
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ready {
    /// gateway protocol version
    #[serde(default)]
    pub v: u8,
    /// session id used for resume
    pub session_id: String,
}

/// Client information sent with identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// operating system
    #[serde(rename = "$os")]
    pub os: String,
    /// library name
    #[serde(rename = "$browser")]
    pub browser: String,
    /// library name
    #[serde(rename = "$device")]
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Identify message data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    /// auth token
    pub token: String,
    /// client properties
    pub properties: ConnectionProperties,
    /// ask server to compress frames
    #[serde(default)]
    pub compress: bool,
    /// member count above which offline members are not sent
    #[serde(default)]
    pub large_threshold: u16,
    /// `[shard_id, shard_count]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    /// initial presence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<StatusUpdate>,
}

/// Resume message data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// auth token
    pub token: String,
    /// session to resume
    pub session_id: String,
    /// last received sequence
    pub seq: u64,
}

/// Activity shown in presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// activity name
    pub name: String,
    /// 0 playing, 1 streaming, 2 listening, 3 watching
    #[serde(rename = "type")]
    pub kind: u8,
    /// stream url, for streaming type only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Presence(status) update message data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// unix time in milliseconds since the client went idle
    pub since: Option<u64>,
    /// current activity
    pub game: Option<Activity>,
    /// online, dnd, idle, invisible or offline
    pub status: String,
    /// is afk
    pub afk: bool,
}

impl StatusUpdate {
    /// Online with no activity
    pub fn online() -> Self {
        Self {
            since: None,
            game: None,
            status: "online".to_string(),
            afk: false,
        }
    }

    /// Set current activity to playing `name`
    pub fn playing<S: Into<String>>(mut self, name: S) -> Self {
        self.game = Some(Activity {
            name: name.into(),
            kind: 0,
            url: None,
        });
        self
    }
}

/// Member query message data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    /// guild to query
    pub guild_id: String,
    /// username prefix, empty for all members
    pub query: String,
    /// max members to return, 0 for no limit
    pub limit: u32,
}
