//! Room registry.
//!
//! Keeps an arena of live room entries keyed by room id, plus an index from
//! connection handle to the (room, user) it joined. Entries are projections
//! of the durable store: they are loaded on first join, updated after every
//! successful write, and evicted once nobody is online. Any operation that
//! finds no entry falls back to the store.
//!
//! Lock order is entry, then arena, then connection index. The arena and the
//! index are never held while waiting for an entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lounge_common::{AppError, AppResult, ClockService, IdGenerator, id::is_valid_room_code};
use lounge_db::entities::{
    room,
    room_message::{self, MessageKind},
    room_participant,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, broadcast};
use validator::Validate;

use super::dispatcher::{BroadcastDispatcher, RoomEvent};
use super::store::RoomStoreService;

/// Hard ceiling on participants, whatever the room says.
pub const MAX_ROOM_CAPACITY: i32 = 50;

/// Default number of active rooms one host may own.
pub const DEFAULT_MAX_ACTIVE_ROOMS_PER_HOST: u64 = 5;

/// Longest message body, in characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Largest page of messages returned at once.
pub const MAX_MESSAGE_PAGE: u64 = 100;

const MAX_CODE_ATTEMPTS: usize = 10;
const MAX_DISPLAY_NAME_LEN: usize = 64;
const MAX_MODE_LEN: usize = 32;
const MODE_STATE_KEY: &str = "currentMode";

const MESSAGE_WEIGHT: u64 = 1;
const VOTE_WEIGHT: u64 = 2;
const POLL_WEIGHT: u64 = 3;

/// Opaque id of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(String);

impl ConnectionHandle {
    /// Allocate a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self(IdGenerator::new().generate_connection_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input for creating a room.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomInput {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    #[validate(range(min = 1, max = 50))]
    #[serde(default = "default_max_participants")]
    pub max_participants: i32,
}

const fn default_max_participants() -> i32 {
    10
}

/// What a participant sees right after joining.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: room::Model,
    /// Online participants, in join order.
    pub participants: Vec<room_participant::Model>,
    pub state: Map<String, Value>,
}

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinedRoom {
    pub snapshot: RoomSnapshot,
    /// Room events, subscribed before the join was announced.
    pub events: broadcast::Receiver<Arc<RoomEvent>>,
}

/// Result of a leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftRoom {
    pub room_id: String,
    pub user_id: String,
    /// The room entry was dropped because nobody is online anymore.
    pub evicted: bool,
}

/// One row of the engagement leaderboard.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub display_name: String,
    pub is_online: bool,
    pub messages_sent: u64,
    pub votes_cast: u64,
    pub polls_created: u64,
    pub score: u64,
}

/// Engagement statistics of a room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub room_id: String,
    pub total_messages: u64,
    pub total_votes: u64,
    pub total_polls: u64,
    pub online_count: usize,
    pub entries: Vec<LeaderboardEntry>,
}

struct LiveParticipant {
    participant: room_participant::Model,
    connection: ConnectionHandle,
}

struct RoomEntry {
    room: room::Model,
    state: Map<String, Value>,
    /// Keyed by user id.
    online: HashMap<String, LiveParticipant>,
    /// Set when the entry leaves the arena. Holders of a stale `Arc` retry.
    evicted: bool,
}

impl RoomEntry {
    fn new(room: room::Model) -> Self {
        Self {
            state: base_state(&room),
            room,
            online: HashMap::new(),
            evicted: false,
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        let mut participants: Vec<_> = self
            .online
            .values()
            .map(|live| live.participant.clone())
            .collect();
        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        RoomSnapshot {
            room: self.room.clone(),
            participants,
            state: self.state.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    room_id: String,
    user_id: String,
}

type EntryRef = Arc<Mutex<RoomEntry>>;

/// Room registry service.
#[derive(Clone)]
pub struct RoomRegistry {
    store: RoomStoreService,
    dispatcher: BroadcastDispatcher,
    clock: ClockService,
    id_gen: IdGenerator,
    max_active_rooms_per_host: u64,
    rooms: Arc<RwLock<HashMap<String, EntryRef>>>,
    connections: Arc<RwLock<HashMap<ConnectionHandle, Binding>>>,
    create_guard: Arc<Mutex<()>>,
}

impl RoomRegistry {
    /// Create a new room registry.
    #[must_use]
    pub fn new(
        store: RoomStoreService,
        dispatcher: BroadcastDispatcher,
        clock: ClockService,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            id_gen: IdGenerator::new(),
            max_active_rooms_per_host: DEFAULT_MAX_ACTIVE_ROOMS_PER_HOST,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            create_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Override the per-host room quota.
    #[must_use]
    pub const fn with_room_quota(mut self, max_active_rooms_per_host: u64) -> Self {
        self.max_active_rooms_per_host = max_active_rooms_per_host;
        self
    }

    // === Rooms ===

    /// Create a room owned by `host_id`.
    pub async fn create_room(
        &self,
        host_id: &str,
        input: CreateRoomInput,
    ) -> AppResult<room::Model> {
        input.validate()?;
        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let _creating = self.create_guard.lock().await;

        let active = self.store.count_active_rooms_by_host(host_id).await?;
        if active >= self.max_active_rooms_per_host {
            return Err(AppError::Quota(format!(
                "A host may own at most {} active rooms",
                self.max_active_rooms_per_host
            )));
        }

        let now = self.clock.now();
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let candidate = room::Model {
                id: self.id_gen.generate(),
                code: self.id_gen.generate_room_code(),
                name: name.clone(),
                host_id: host_id.to_string(),
                max_participants: input.max_participants,
                current_mode: room::DEFAULT_MODE.to_string(),
                is_active: true,
                created_at: now.into(),
                updated_at: now.into(),
                last_activity_at: now.into(),
            };

            match self.store.insert_room(candidate).await {
                Ok(room) => {
                    self.rooms.write().await.insert(
                        room.id.clone(),
                        Arc::new(Mutex::new(RoomEntry::new(room.clone()))),
                    );
                    tracing::info!(
                        room_id = %room.id,
                        code = %room.code,
                        host_id = %host_id,
                        "Created room"
                    );
                    return Ok(room);
                }
                Err(AppError::Conflict(_)) => {
                    tracing::debug!(attempt, "Room code collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Internal(
            "Could not allocate a unique room code".to_string(),
        ))
    }

    /// Get a room by id, active or not.
    pub async fn get_room(&self, room_id: &str) -> AppResult<room::Model> {
        if let Some(entry) = self.cached_entry(room_id).await {
            let guard = entry.lock().await;
            if !guard.evicted {
                return Ok(guard.room.clone());
            }
        }
        self.store
            .find_room(room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))
    }

    /// Get a room by its public code. Codes are case-insensitive.
    pub async fn get_room_by_code(&self, code: &str) -> AppResult<room::Model> {
        let code = code.trim().to_uppercase();
        if !is_valid_room_code(&code) {
            return Err(AppError::NotFound(format!("Room {code}")));
        }
        let room = self
            .store
            .find_room_by_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {code}")))?;
        self.get_room(&room.id).await
    }

    /// Whether `user_id` hosts `room_id`. Unknown rooms have no host.
    pub async fn is_host(&self, room_id: &str, user_id: &str) -> AppResult<bool> {
        match self.get_room(room_id).await {
            Ok(room) => Ok(room.host_id == user_id),
            Err(AppError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Current view of a room: the live entry, or the store when evicted.
    pub async fn room_snapshot(&self, room_id: &str) -> AppResult<RoomSnapshot> {
        if let Some(entry) = self.cached_entry(room_id).await {
            let guard = entry.lock().await;
            if !guard.evicted {
                return Ok(guard.snapshot());
            }
        }

        let room = self
            .store
            .find_room(room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))?;
        let participants = self
            .store
            .list_participants(room_id)
            .await?
            .into_iter()
            .filter(|p| p.is_online)
            .collect();
        Ok(RoomSnapshot {
            state: base_state(&room),
            room,
            participants,
        })
    }

    /// Soft-delete a room. Host only.
    pub async fn delete_room(&self, room_id: &str, user_id: &str) -> AppResult<()> {
        let guard = self.lock_cached(room_id).await;
        let room = match guard.as_ref() {
            Some(entry) => entry.room.clone(),
            None => self
                .store
                .find_room(room_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))?,
        };
        if !room.is_active {
            return Err(AppError::NotFound(format!("Room {room_id}")));
        }
        if room.host_id != user_id {
            return Err(AppError::Forbidden(
                "Only the host can delete the room".to_string(),
            ));
        }

        let now = self.clock.now();
        self.store.deactivate_room(room_id, now).await?;

        let mut dropped = Vec::new();
        if let Some(mut entry) = guard {
            entry.evicted = true;
            entry.room.is_active = false;
            dropped.extend(entry.online.drain());
            self.rooms.write().await.remove(room_id);
        }
        {
            let mut connections = self.connections.write().await;
            for (_, live) in &dropped {
                connections.remove(&live.connection);
            }
        }
        for (user, _) in &dropped {
            self.mark_offline(room_id, user, now).await;
        }

        self.dispatcher
            .publish(
                room_id,
                RoomEvent::Closed {
                    room_id: room_id.to_string(),
                },
            )
            .await;
        self.dispatcher.close_room(room_id).await;

        tracing::info!(
            room_id = %room_id,
            disconnected = dropped.len(),
            "Deleted room"
        );
        Ok(())
    }

    // === Presence ===

    /// Join `room_id` on `connection`.
    ///
    /// A returning user keeps their membership row and seat; their previous
    /// connection stops being tracked.
    pub async fn join_room(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        connection: &ConnectionHandle,
    ) -> AppResult<JoinedRoom> {
        let display_name = normalize_display_name(display_name)?;

        if let Some(current) = self.binding(connection).await {
            if current.room_id != room_id || current.user_id != user_id {
                return Err(AppError::Conflict(
                    "Connection already joined another room".to_string(),
                ));
            }
        }

        loop {
            let entry = self.load_entry(room_id).await?;
            let mut guard = entry.lock().await;
            if guard.evicted {
                continue;
            }
            if !guard.room.is_active {
                return Err(AppError::NotFound(format!("Room {room_id}")));
            }

            let rejoining = guard.online.contains_key(user_id);
            let capacity =
                usize::try_from(guard.room.max_participants.clamp(1, MAX_ROOM_CAPACITY))
                    .unwrap_or(1);
            if !rejoining && guard.online.len() >= capacity {
                tracing::debug!(room_id = %room_id, user_id = %user_id, capacity, "Room is full");
                return Err(AppError::Capacity(format!(
                    "Room is full ({capacity} participants)"
                )));
            }

            let now = self.clock.now();
            let participant = self
                .store
                .set_participant_online(
                    self.id_gen.generate(),
                    room_id,
                    user_id,
                    &display_name,
                    now,
                )
                .await?;
            if let Err(e) = self.store.touch_room(room_id, now).await {
                tracing::warn!(room_id = %room_id, error = %e, "Failed to touch room");
            }

            let replaced = guard.online.insert(
                user_id.to_string(),
                LiveParticipant {
                    participant,
                    connection: connection.clone(),
                },
            );
            guard.room.last_activity_at = now.into();
            {
                let mut connections = self.connections.write().await;
                if let Some(previous) = replaced {
                    if previous.connection != *connection {
                        connections.remove(&previous.connection);
                    }
                }
                connections.insert(
                    connection.clone(),
                    Binding {
                        room_id: room_id.to_string(),
                        user_id: user_id.to_string(),
                    },
                );
            }

            let events = self.dispatcher.subscribe(room_id).await;
            let snapshot = guard.snapshot();

            let mut outgoing = vec![RoomEvent::ParticipantJoined {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                display_name: display_name.clone(),
            }];
            if let Some(message) = self
                .record_system_message(room_id, format!("{display_name} joined"), now)
                .await
            {
                outgoing.push(RoomEvent::MessageReceived { message });
            }
            self.dispatcher.publish_all(room_id, outgoing).await;

            tracing::info!(
                room_id = %room_id,
                user_id = %user_id,
                online = guard.online.len(),
                rejoining,
                "Participant joined"
            );
            return Ok(JoinedRoom { snapshot, events });
        }
    }

    /// Leave whatever room `connection` joined. Unknown handles are ignored.
    pub async fn leave_room(&self, connection: &ConnectionHandle) -> Option<LeftRoom> {
        let Binding { room_id, user_id } = self.connections.write().await.remove(connection)?;
        let now = self.clock.now();

        let mut display_name = None;
        let mut evicted = false;
        if let Some(entry) = self.cached_entry(&room_id).await {
            let mut guard = entry.lock().await;
            if !guard.evicted {
                match guard.online.get(&user_id) {
                    Some(live) if live.connection == *connection => {
                        self.mark_offline(&room_id, &user_id, now).await;
                        display_name = guard
                            .online
                            .remove(&user_id)
                            .map(|live| live.participant.display_name);
                    }
                    // A newer connection of the same user holds the seat.
                    Some(_) => return None,
                    None => {}
                }

                if guard.online.is_empty() {
                    guard.evicted = true;
                    self.rooms.write().await.remove(&room_id);
                    evicted = true;
                }
            }
        }

        let display_name = match display_name {
            Some(name) => name,
            None => {
                self.mark_offline(&room_id, &user_id, now).await;
                match self.store.find_participant(&room_id, &user_id).await {
                    Ok(Some(p)) => p.display_name,
                    Ok(None) => user_id.clone(),
                    Err(e) => {
                        tracing::warn!(room_id = %room_id, error = %e, "Failed to load participant");
                        user_id.clone()
                    }
                }
            }
        };

        let mut outgoing = vec![RoomEvent::ParticipantLeft {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            display_name: display_name.clone(),
        }];
        if let Some(message) = self
            .record_system_message(&room_id, format!("{display_name} left"), now)
            .await
        {
            outgoing.push(RoomEvent::MessageReceived { message });
        }
        self.dispatcher.publish_all(&room_id, outgoing).await;

        if evicted {
            self.dispatcher.release_if_idle(&room_id).await;
            tracing::debug!(room_id = %room_id, "Evicted idle room entry");
        }

        tracing::info!(room_id = %room_id, user_id = %user_id, "Participant left");
        Some(LeftRoom {
            room_id,
            user_id,
            evicted,
        })
    }

    /// Room and user a connection joined.
    pub async fn connection_room(&self, connection: &ConnectionHandle) -> Option<(String, String)> {
        self.binding(connection)
            .await
            .map(|b| (b.room_id, b.user_id))
    }

    /// Number of participants currently online in memory.
    pub async fn online_count(&self, room_id: &str) -> usize {
        match self.cached_entry(room_id).await {
            Some(entry) => {
                let guard = entry.lock().await;
                if guard.evicted { 0 } else { guard.online.len() }
            }
            None => 0,
        }
    }

    /// Record activity on a connection.
    pub async fn touch(&self, connection: &ConnectionHandle) {
        let Some(binding) = self.binding(connection).await else {
            return;
        };
        if let Some(entry) = self.cached_entry(&binding.room_id).await {
            let mut guard = entry.lock().await;
            if let Some(live) = guard.online.get_mut(&binding.user_id) {
                if live.connection == *connection {
                    live.participant.last_seen_at = self.clock.now().into();
                }
            }
        }
    }

    /// All participants of a room, online or not.
    pub async fn list_participants(
        &self,
        room_id: &str,
    ) -> AppResult<Vec<room_participant::Model>> {
        self.get_room(room_id).await?;
        self.store.list_participants(room_id).await
    }

    /// Flag every participant offline. Run once at startup, when no
    /// connection can exist yet.
    pub async fn reset_presence(&self) -> AppResult<u64> {
        let count = self.store.reset_presence(self.clock.now()).await?;
        if count > 0 {
            tracing::info!(count, "Reset stale presence");
        }
        Ok(count)
    }

    /// Flag offline every participant the store believes online but that has
    /// no live connection, and evict idle room entries.
    pub async fn reap_stale_presence(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let mut reaped = 0;

        for participant in self.store.list_online_participants().await? {
            let live = match self.cached_entry(&participant.room_id).await {
                Some(entry) => {
                    let guard = entry.lock().await;
                    !guard.evicted && guard.online.contains_key(&participant.user_id)
                }
                None => false,
            };
            if !live {
                self.store
                    .set_participant_offline(&participant.room_id, &participant.user_id, now)
                    .await?;
                reaped += 1;
            }
        }

        let entries: Vec<(String, EntryRef)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();
        for (room_id, entry) in entries {
            let mut guard = entry.lock().await;
            if !guard.evicted && guard.online.is_empty() {
                guard.evicted = true;
                self.rooms.write().await.remove(&room_id);
                drop(guard);
                self.dispatcher.release_if_idle(&room_id).await;
            }
        }

        Ok(reaped)
    }

    // === Room state ===

    /// Merge `patch` into the room state. Host only.
    ///
    /// `null` values remove keys. A `currentMode` key must be a non-empty
    /// string and is persisted.
    pub async fn update_room_state(
        &self,
        room_id: &str,
        user_id: &str,
        patch: Map<String, Value>,
    ) -> AppResult<Map<String, Value>> {
        let new_mode = match patch.get(MODE_STATE_KEY) {
            None => None,
            Some(Value::String(mode))
                if !mode.trim().is_empty() && mode.trim().chars().count() <= MAX_MODE_LEN =>
            {
                Some(mode.trim().to_string())
            }
            Some(_) => {
                return Err(AppError::Validation(format!(
                    "{MODE_STATE_KEY} must be a non-empty string of at most {MAX_MODE_LEN} characters"
                )));
            }
        };

        let mut guard = self.lock_cached(room_id).await;
        let room = self.room_for_update(room_id, guard.as_deref()).await?;
        if room.host_id != user_id {
            return Err(AppError::Forbidden(
                "Only the host can update room state".to_string(),
            ));
        }

        if let Some(mode) = &new_mode {
            self.store
                .update_room_mode(room_id, mode, self.clock.now())
                .await?;
        }

        let state = match guard.as_mut() {
            Some(entry) => {
                merge_state(&mut entry.state, patch);
                if let Some(mode) = &new_mode {
                    entry.room.current_mode.clone_from(mode);
                    entry
                        .state
                        .insert(MODE_STATE_KEY.to_string(), Value::String(mode.clone()));
                }
                entry.state.clone()
            }
            None => {
                let mut state = base_state(&room);
                merge_state(&mut state, patch);
                if let Some(mode) = &new_mode {
                    state.insert(MODE_STATE_KEY.to_string(), Value::String(mode.clone()));
                }
                state
            }
        };

        let mut outgoing = vec![RoomEvent::StateUpdated {
            room_id: room_id.to_string(),
            state: state.clone(),
            updated_by: user_id.to_string(),
        }];
        if let Some(mode) = new_mode.filter(|m| *m != room.current_mode) {
            tracing::info!(room_id = %room_id, mode = %mode, "Host changed room mode");
            outgoing.push(RoomEvent::ModeChanged {
                room_id: room_id.to_string(),
                new_mode: mode,
                reason: "host_update".to_string(),
            });
        }
        self.dispatcher.publish_all(room_id, outgoing).await;

        Ok(state)
    }

    /// Switch a room's mode and announce it.
    pub async fn apply_mode(&self, room_id: &str, mode: &str, reason: &str) -> AppResult<()> {
        let mut guard = self.lock_cached(room_id).await;
        self.room_for_update(room_id, guard.as_deref()).await?;

        self.store
            .update_room_mode(room_id, mode, self.clock.now())
            .await?;
        if let Some(entry) = guard.as_mut() {
            entry.room.current_mode = mode.to_string();
            entry
                .state
                .insert(MODE_STATE_KEY.to_string(), Value::String(mode.to_string()));
        }

        self.dispatcher
            .publish(
                room_id,
                RoomEvent::ModeChanged {
                    room_id: room_id.to_string(),
                    new_mode: mode.to_string(),
                    reason: reason.to_string(),
                },
            )
            .await;
        tracing::info!(room_id = %room_id, mode = %mode, reason = %reason, "Applied room mode");
        Ok(())
    }

    // === Messages ===

    /// Post a message as the participant bound to `connection`.
    pub async fn post_message(
        &self,
        connection: &ConnectionHandle,
        kind: MessageKind,
        content: &str,
        metadata: Option<Value>,
    ) -> AppResult<room_message::Model> {
        let binding = self.binding(connection).await.ok_or_else(|| {
            AppError::Validation("Join a room before sending messages".to_string())
        })?;
        if kind == MessageKind::System {
            return Err(AppError::Validation(
                "System messages cannot be posted".to_string(),
            ));
        }
        let content = content.trim();
        let length = content.chars().count();
        if length == 0 || length > MAX_MESSAGE_LEN {
            return Err(AppError::Validation(format!(
                "Message must be between 1 and {MAX_MESSAGE_LEN} characters"
            )));
        }

        let mut guard = self.lock_cached(&binding.room_id).await;
        let now = self.clock.now();
        let message = self
            .store
            .insert_message(room_message::Model {
                id: self.id_gen.generate(),
                room_id: binding.room_id.clone(),
                user_id: Some(binding.user_id.clone()),
                kind,
                content: content.to_string(),
                metadata,
                created_at: now.into(),
            })
            .await?;
        if let Err(e) = self.store.touch_room(&binding.room_id, now).await {
            tracing::warn!(room_id = %binding.room_id, error = %e, "Failed to touch room");
        }

        if let Some(entry) = guard.as_mut() {
            entry.room.last_activity_at = now.into();
            if let Some(live) = entry.online.get_mut(&binding.user_id) {
                live.participant.last_seen_at = now.into();
            }
        }

        self.dispatcher
            .publish(
                &binding.room_id,
                RoomEvent::MessageReceived {
                    message: message.clone(),
                },
            )
            .await;
        Ok(message)
    }

    /// Most recent messages of a room, oldest first.
    pub async fn list_messages(
        &self,
        room_id: &str,
        limit: Option<u64>,
    ) -> AppResult<Vec<room_message::Model>> {
        self.get_room(room_id).await?;
        let limit = limit.unwrap_or(50).clamp(1, MAX_MESSAGE_PAGE);
        self.store.list_recent_messages(room_id, limit).await
    }

    // === Stats ===

    /// Engagement leaderboard: one point per message, two per vote, three
    /// per poll created.
    pub async fn engagement_stats(&self, room_id: &str) -> AppResult<Leaderboard> {
        self.get_room(room_id).await?;
        let participants = self.store.list_participants(room_id).await?;
        let counts = self.store.activity_counts(room_id).await?;

        let mut names: HashMap<String, (String, bool)> = participants
            .into_iter()
            .map(|p| (p.user_id, (p.display_name, p.is_online)))
            .collect();
        for user in counts
            .messages
            .keys()
            .chain(counts.votes.keys())
            .chain(counts.polls_created.keys())
        {
            names
                .entry(user.clone())
                .or_insert_with(|| (user.clone(), false));
        }

        let count_of = |map: &HashMap<String, u64>, user: &str| map.get(user).copied().unwrap_or(0);
        let mut entries: Vec<LeaderboardEntry> = names
            .into_iter()
            .map(|(user_id, (display_name, is_online))| {
                let messages_sent = count_of(&counts.messages, &user_id);
                let votes_cast = count_of(&counts.votes, &user_id);
                let polls_created = count_of(&counts.polls_created, &user_id);
                LeaderboardEntry {
                    rank: 0,
                    score: messages_sent * MESSAGE_WEIGHT
                        + votes_cast * VOTE_WEIGHT
                        + polls_created * POLL_WEIGHT,
                    user_id,
                    display_name,
                    is_online,
                    messages_sent,
                    votes_cast,
                    polls_created,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id)));
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }

        Ok(Leaderboard {
            room_id: room_id.to_string(),
            total_messages: counts.messages.values().sum(),
            total_votes: counts.votes.values().sum(),
            total_polls: counts.polls_created.values().sum(),
            online_count: entries.iter().filter(|e| e.is_online).count(),
            entries,
        })
    }

    // === Internals ===

    async fn binding(&self, connection: &ConnectionHandle) -> Option<Binding> {
        self.connections.read().await.get(connection).cloned()
    }

    async fn cached_entry(&self, room_id: &str) -> Option<EntryRef> {
        self.rooms.read().await.get(room_id).map(Arc::clone)
    }

    /// Lock the live entry of a room if there is one.
    async fn lock_cached(&self, room_id: &str) -> Option<OwnedMutexGuard<RoomEntry>> {
        let entry = self.cached_entry(room_id).await?;
        let guard = entry.lock_owned().await;
        (!guard.evicted).then_some(guard)
    }

    /// Live entry of an active room, loading it from the store if needed.
    async fn load_entry(&self, room_id: &str) -> AppResult<EntryRef> {
        if let Some(entry) = self.cached_entry(room_id).await {
            return Ok(entry);
        }

        let room = self
            .store
            .find_room(room_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))?;

        let mut rooms = self.rooms.write().await;
        Ok(Arc::clone(rooms.entry(room_id.to_string()).or_insert_with(
            || Arc::new(Mutex::new(RoomEntry::new(room))),
        )))
    }

    /// The room a mutation applies to; must exist and be active.
    async fn room_for_update(
        &self,
        room_id: &str,
        entry: Option<&RoomEntry>,
    ) -> AppResult<room::Model> {
        let room = match entry {
            Some(entry) => entry.room.clone(),
            None => self
                .store
                .find_room(room_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))?,
        };
        if !room.is_active {
            return Err(AppError::NotFound(format!("Room {room_id}")));
        }
        Ok(room)
    }

    async fn mark_offline(&self, room_id: &str, user_id: &str, now: DateTime<Utc>) {
        if let Err(e) = self
            .store
            .set_participant_offline(room_id, user_id, now)
            .await
        {
            tracing::warn!(
                room_id = %room_id,
                user_id = %user_id,
                error = %e,
                "Failed to mark participant offline"
            );
        }
    }

    async fn record_system_message(
        &self,
        room_id: &str,
        content: String,
        now: DateTime<Utc>,
    ) -> Option<room_message::Model> {
        let message = room_message::Model {
            id: self.id_gen.generate(),
            room_id: room_id.to_string(),
            user_id: None,
            kind: MessageKind::System,
            content,
            metadata: None,
            created_at: now.into(),
        };
        match self.store.insert_message(message).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "Failed to record system message");
                None
            }
        }
    }
}

fn base_state(room: &room::Model) -> Map<String, Value> {
    let mut state = Map::new();
    state.insert(
        MODE_STATE_KEY.to_string(),
        Value::String(room.current_mode.clone()),
    );
    state
}

fn merge_state(state: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if value.is_null() {
            state.remove(&key);
        } else {
            state.insert(key, value);
        }
    }
}

fn normalize_display_name(display_name: &str) -> AppResult<String> {
    let name = display_name.trim();
    let length = name.chars().count();
    if length == 0 || length > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Display name must be between 1 and {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}
