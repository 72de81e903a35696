//! WebSocket streaming API.
//!
//! One connection is in at most one room. Frames are JSON text shaped as
//! `{"type": "...", "body": {...}}` in both directions.

#![allow(missing_docs)]

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use lounge_common::{AppError, AppResult};
use lounge_core::{ConnectionHandle, CreatePollInput, RoomEvent, SessionUser};
use lounge_db::entities::room_message::MessageKind;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::middleware::AppState;

/// Streaming query parameters.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Access token for authentication.
    #[serde(rename = "i")]
    pub token: Option<String>,
}

/// Client-to-server message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum ClientMessage {
    #[serde(rename = "room.join", rename_all = "camelCase")]
    Join {
        room_id: String,
        /// Falls back to the name carried by the session, then the user id.
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Sent as `{}`; the body carries nothing and may be omitted.
    #[serde(rename = "room.leave")]
    Leave(#[allow(dead_code)] Option<Map<String, Value>>),

    #[serde(rename = "room.message")]
    Message {
        #[serde(rename = "type", default = "default_message_kind")]
        kind: MessageKind,
        content: String,
        #[serde(default)]
        metadata: Option<Value>,
    },

    /// Host only.
    #[serde(rename = "room.stateUpdate")]
    StateUpdate { updates: Map<String, Value> },

    #[serde(rename = "poll.create")]
    CreatePoll(CreatePollInput),

    #[serde(rename = "poll.vote", rename_all = "camelCase")]
    Vote { poll_id: String, option_id: String },

    #[serde(rename = "poll.close", rename_all = "camelCase")]
    ClosePoll { poll_id: String },
}

const fn default_message_kind() -> MessageKind {
    MessageKind::Text
}

/// WebSocket handler for streaming.
///
/// The token comes from `?i=` or a bearer `Authorization` header. Anonymous
/// upgrades are refused.
pub async fn streaming_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    });
    let Some(token) = token else {
        return AppError::Unauthorized.into_response();
    };

    let user = match state.session_verifier.verify(&token).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "Streaming auth failed");
            return e.into_response();
        }
    };

    info!(user_id = %user.user_id, "New streaming connection");
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, user: SessionUser, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = RoomConnection::new(state, user);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        conn.touch().await;
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => conn.handle(client_msg).await,
                            Err(e) => {
                                debug!(error = %e, "Failed to parse client message");
                                Some(RoomEvent::Error {
                                    code: "BAD_MESSAGE".to_string(),
                                    message: format!("Malformed message: {e}"),
                                })
                            }
                        };
                        if let Some(reply) = reply
                            && send_event(&mut sender, &reply).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        conn.touch().await;
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            event = conn.next_event() => {
                if let Some(event) = event
                    && send_event(&mut sender, &event).await.is_err()
                {
                    break;
                }
            }
        }
    }

    conn.disconnect().await;
    info!("Streaming connection closed");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &RoomEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    sender.send(Message::Text(json.into())).await
}

/// State of one real-time connection.
pub struct RoomConnection {
    state: AppState,
    user: SessionUser,
    handle: ConnectionHandle,
    events: Option<broadcast::Receiver<Arc<RoomEvent>>>,
}

impl RoomConnection {
    #[must_use]
    pub fn new(state: AppState, user: SessionUser) -> Self {
        Self {
            state,
            user,
            handle: ConnectionHandle::new(),
            events: None,
        }
    }

    /// Run one client request. Failures come back as an `error` event and
    /// leave the connection usable.
    pub async fn handle(&mut self, msg: ClientMessage) -> Option<RoomEvent> {
        match self.dispatch(msg).await {
            Ok(reply) => reply,
            Err(e) => {
                e.log();
                Some(RoomEvent::Error {
                    code: e.error_code().to_string(),
                    message: e.public_message(),
                })
            }
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> AppResult<Option<RoomEvent>> {
        match msg {
            ClientMessage::Join {
                room_id,
                display_name,
            } => self.join(&room_id, display_name).await.map(Some),
            ClientMessage::Leave(_) => {
                self.leave().await;
                Ok(None)
            }
            ClientMessage::Message {
                kind,
                content,
                metadata,
            } => {
                self.state
                    .room_registry
                    .post_message(&self.handle, kind, &content, metadata)
                    .await?;
                Ok(None)
            }
            ClientMessage::StateUpdate { updates } => {
                let room_id = self.current_room().await?;
                self.state
                    .room_registry
                    .update_room_state(&room_id, &self.user.user_id, updates)
                    .await?;
                Ok(None)
            }
            ClientMessage::CreatePoll(input) => {
                let room_id = self.current_room().await?;
                self.state
                    .poll_service
                    .create_poll(&room_id, &self.user.user_id, input)
                    .await?;
                Ok(None)
            }
            ClientMessage::Vote { poll_id, option_id } => {
                let room_id = self.current_room().await?;
                let details = self.state.poll_service.get_poll(&poll_id).await?;
                if details.poll.room_id != room_id {
                    return Err(AppError::NotFound(format!("Poll {poll_id}")));
                }
                let results = self
                    .state
                    .poll_service
                    .cast_vote(&poll_id, &self.user.user_id, &option_id)
                    .await?;
                Ok(Some(RoomEvent::VoteReceived { poll_id, results }))
            }
            ClientMessage::ClosePoll { poll_id } => {
                self.state
                    .poll_service
                    .close_poll(&poll_id, &self.user.user_id)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn join(&mut self, room_id: &str, display_name: Option<String>) -> AppResult<RoomEvent> {
        if let Some((current, _)) = self.state.room_registry.connection_room(&self.handle).await
            && current != room_id
        {
            self.leave().await;
        }

        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.user.display_name.clone())
            .unwrap_or_else(|| self.user.user_id.clone());

        let joined = self
            .state
            .room_registry
            .join_room(room_id, &self.user.user_id, &display_name, &self.handle)
            .await?;
        self.events = Some(joined.events);
        Ok(RoomEvent::Joined(joined.snapshot))
    }

    async fn leave(&mut self) {
        self.events = None;
        if let Some(left) = self.state.room_registry.leave_room(&self.handle).await {
            debug!(room_id = %left.room_id, user_id = %left.user_id, "Left room");
        }
    }

    async fn current_room(&self) -> AppResult<String> {
        self.state
            .room_registry
            .connection_room(&self.handle)
            .await
            .map(|(room_id, _)| room_id)
            .ok_or_else(|| AppError::Validation("Join a room first".to_string()))
    }

    async fn touch(&self) {
        self.state.room_registry.touch(&self.handle).await;
    }

    /// Next room event for this connection. Pending while not in a room.
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match events.recv().await {
            Ok(event) => Some(event.as_ref().clone()),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, user_id = %self.user.user_id, "Connection lagged behind room events");
                None
            }
            Err(RecvError::Closed) => {
                self.events = None;
                None
            }
        }
    }

    /// Release the seat held by this connection.
    pub async fn disconnect(mut self) {
        self.leave().await;
    }
}
