//! The real-time room a tutoring session runs in.
//!
//! A room transport delivers one participant, a broadcast stream of room
//! events (data-channel packets and disconnections) and carries audio between
//! the participant and the conversational model. Only the parts the session
//! controller drives are modelled here.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// The learner who joined the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    pub metadata: Option<String>,
}

impl Participant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            metadata: None,
        }
    }

    /// The string the session mode is derived from: non-empty metadata, or
    /// the identity when there is none.
    pub fn mode_key(&self) -> &str {
        self.metadata
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.identity)
    }
}

/// A packet received on the room's data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub payload: Vec<u8>,
    pub topic: Option<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    DataReceived(DataPacket),
    ParticipantDisconnected { identity: String },
    /// The transport itself went away.
    Disconnected,
}

#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// A stable name for the room, used in logs and transcript paths.
    fn name(&self) -> &str;

    /// Joins the room and starts delivering events.
    async fn connect(&self) -> Result<()>;

    /// Resolves once a participant has joined.
    async fn wait_for_participant(&self) -> Result<Participant>;

    /// Subscribes to room events. A subscriber only observes events sent
    /// after it subscribed; earlier events are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<RoomEvent>;
}
