use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from display WebSocket clients. Anything but a ping is
/// logged and ignored.
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DisplayInboundMessage {
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
/// Messages the server pushes to display clients.
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DisplayOutboundMessage {
    Pong,
    Invalidate { revision: i64 },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
/// Event published on a school channel after a revision bump commits.
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelEvent {
    Invalidate {
        school_id: i64,
        revision: i64,
        /// Publisher wall clock, epoch milliseconds.
        ts: i64,
    },
}

impl ChannelEvent {
    pub fn revision(&self) -> i64 {
        match self {
            ChannelEvent::Invalidate { revision, .. } => *revision,
        }
    }

    pub fn school_id(&self) -> i64 {
        match self {
            ChannelEvent::Invalidate { school_id, .. } => *school_id,
        }
    }
}
