//! Room-scoped event fan-out.
//!
//! Every room gets its own `tokio::sync::broadcast` channel. Because a
//! broadcast channel is a single queue, every subscriber of a room observes
//! the same order of events. Nothing is replayed: a subscriber that lags or
//! disconnects misses events and re-fetches snapshots instead.

use std::collections::HashMap;
use std::sync::Arc;

use lounge_db::entities::{poll, room_message};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{RwLock, broadcast};

use super::poll::OptionResult;
use super::room::RoomSnapshot;

/// Default capacity of a room channel.
pub const DEFAULT_ROOM_CHANNEL_CAPACITY: usize = 256;

/// Event delivered to the participants of a room.
///
/// Serialized as `{"type": "<name>", "body": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "body")]
pub enum RoomEvent {
    /// Sent only to the connection that joined.
    #[serde(rename = "room.joined")]
    Joined(RoomSnapshot),

    #[serde(rename = "room.participantJoined", rename_all = "camelCase")]
    ParticipantJoined {
        room_id: String,
        user_id: String,
        display_name: String,
    },

    #[serde(rename = "room.participantLeft", rename_all = "camelCase")]
    ParticipantLeft {
        room_id: String,
        user_id: String,
        display_name: String,
    },

    #[serde(rename = "room.messageReceived")]
    MessageReceived { message: room_message::Model },

    #[serde(rename = "room.stateUpdated", rename_all = "camelCase")]
    StateUpdated {
        room_id: String,
        state: Map<String, Value>,
        updated_by: String,
    },

    #[serde(rename = "room.modeChanged", rename_all = "camelCase")]
    ModeChanged {
        room_id: String,
        new_mode: String,
        reason: String,
    },

    /// The host deleted the room.
    #[serde(rename = "room.closed", rename_all = "camelCase")]
    Closed { room_id: String },

    #[serde(rename = "poll.created")]
    PollCreated {
        poll: poll::Model,
        results: Vec<OptionResult>,
    },

    /// Sent only to the voter.
    #[serde(rename = "poll.voteReceived", rename_all = "camelCase")]
    VoteReceived {
        poll_id: String,
        results: Vec<OptionResult>,
    },

    #[serde(rename = "poll.resultsUpdate", rename_all = "camelCase")]
    ResultsUpdate {
        poll_id: String,
        results: Vec<OptionResult>,
    },

    #[serde(rename = "poll.closed")]
    PollClosed {
        poll: poll::Model,
        results: Vec<OptionResult>,
    },

    #[serde(rename = "poll.expired")]
    PollExpired {
        poll: poll::Model,
        results: Vec<OptionResult>,
    },

    /// Sent only to the connection whose request failed.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl RoomEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Joined(_) => "room.joined",
            Self::ParticipantJoined { .. } => "room.participantJoined",
            Self::ParticipantLeft { .. } => "room.participantLeft",
            Self::MessageReceived { .. } => "room.messageReceived",
            Self::StateUpdated { .. } => "room.stateUpdated",
            Self::ModeChanged { .. } => "room.modeChanged",
            Self::Closed { .. } => "room.closed",
            Self::PollCreated { .. } => "poll.created",
            Self::VoteReceived { .. } => "poll.voteReceived",
            Self::ResultsUpdate { .. } => "poll.resultsUpdate",
            Self::PollClosed { .. } => "poll.closed",
            Self::PollExpired { .. } => "poll.expired",
            Self::Error { .. } => "error",
        }
    }
}

/// Per-room broadcast hub. Cloneable; store it in application state.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Arc<RoomEvent>>>>>,
    capacity: usize,
}

impl BroadcastDispatcher {
    /// Create a dispatcher whose room channels buffer `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a room, creating its channel on first use.
    pub async fn subscribe(&self, room_id: &str) -> broadcast::Receiver<Arc<RoomEvent>> {
        if let Some(sender) = self.channels.read().await.get(room_id) {
            return sender.subscribe();
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish one event. Returns how many subscribers will see it.
    pub async fn publish(&self, room_id: &str, event: RoomEvent) -> usize {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(room_id) else {
            return 0;
        };

        let name = event.name();
        // Err only means there are no subscribers right now.
        let delivered = sender.send(Arc::new(event)).unwrap_or(0);
        tracing::trace!(room_id = %room_id, event = name, delivered, "Published room event");
        delivered
    }

    /// Publish the events of one operation, in order.
    ///
    /// The read lock is held across the whole sequence, so the channel cannot
    /// be closed halfway through.
    pub async fn publish_all(&self, room_id: &str, events: impl IntoIterator<Item = RoomEvent>) {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(room_id) else {
            return;
        };
        for event in events {
            let _ = sender.send(Arc::new(event));
        }
    }

    /// Drop a room's channel. Subscribers drain what is buffered, then see
    /// the channel as closed.
    pub async fn close_room(&self, room_id: &str) {
        if self.channels.write().await.remove(room_id).is_some() {
            tracing::debug!(room_id = %room_id, "Closed room channel");
        }
    }

    /// Drop a room's channel if nobody listens to it anymore.
    pub async fn release_if_idle(&self, room_id: &str) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(room_id) {
            Some(sender) if sender.receiver_count() == 0 => {
                channels.remove(room_id);
                true
            }
            _ => false,
        }
    }

    /// Number of live subscribers of a room.
    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(room_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of rooms with an open channel.
    pub async fn room_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CHANNEL_CAPACITY)
    }
}
