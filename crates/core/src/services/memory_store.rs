//! Process-local [`RoomStore`].
//!
//! Holds every table behind one lock, which makes each operation atomic and
//! lets it enforce the same unique keys as the database schema. Used by tests
//! and for running the service without `PostgreSQL`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lounge_common::{AppError, AppResult};
use lounge_db::entities::{
    poll::{self, PollStatus},
    poll_vote, room, room_message, room_participant,
};
use tokio::sync::Mutex;

use super::store::{ActivityCounts, RoomStore};

#[derive(Default)]
struct Tables {
    rooms: HashMap<String, room::Model>,
    participants: Vec<room_participant::Model>,
    messages: Vec<room_message::Model>,
    polls: HashMap<String, poll::Model>,
    votes: Vec<poll_vote::Model>,
}

/// In-memory [`RoomStore`].
#[derive(Default)]
pub struct MemoryRoomStore {
    tables: Mutex<Tables>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn insert_room(&self, room: room::Model) -> AppResult<room::Model> {
        let mut tables = self.tables.lock().await;
        if tables.rooms.values().any(|r| r.code == room.code) {
            return Err(AppError::Conflict("Room code already in use".to_string()));
        }
        tables.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn find_room(&self, room_id: &str) -> AppResult<Option<room::Model>> {
        Ok(self.tables.lock().await.rooms.get(room_id).cloned())
    }

    async fn find_room_by_code(&self, code: &str) -> AppResult<Option<room::Model>> {
        Ok(self
            .tables
            .lock()
            .await
            .rooms
            .values()
            .find(|r| r.code == code)
            .cloned())
    }

    async fn count_active_rooms_by_host(&self, host_id: &str) -> AppResult<u64> {
        Ok(self
            .tables
            .lock()
            .await
            .rooms
            .values()
            .filter(|r| r.host_id == host_id && r.is_active)
            .count() as u64)
    }

    async fn update_room_mode(
        &self,
        room_id: &str,
        mode: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(room) = self.tables.lock().await.rooms.get_mut(room_id) {
            room.current_mode = mode.to_string();
            room.updated_at = now.into();
            room.last_activity_at = now.into();
        }
        Ok(())
    }

    async fn touch_room(&self, room_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(room) = self.tables.lock().await.rooms.get_mut(room_id) {
            room.last_activity_at = now.into();
        }
        Ok(())
    }

    async fn deactivate_room(&self, room_id: &str, now: DateTime<Utc>) -> AppResult<bool> {
        match self.tables.lock().await.rooms.get_mut(room_id) {
            Some(room) if room.is_active => {
                room.is_active = false;
                room.updated_at = now.into();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_participant_online(
        &self,
        participant_id: String,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<room_participant::Model> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables
            .participants
            .iter_mut()
            .find(|p| p.room_id == room_id && p.user_id == user_id)
        {
            existing.display_name = display_name.to_string();
            existing.is_online = true;
            existing.last_seen_at = now.into();
            return Ok(existing.clone());
        }

        let participant = room_participant::Model {
            id: participant_id,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            is_online: true,
            joined_at: now.into(),
            last_seen_at: now.into(),
        };
        tables.participants.push(participant.clone());
        Ok(participant)
    }

    async fn set_participant_offline(
        &self,
        room_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        for participant in tables
            .participants
            .iter_mut()
            .filter(|p| p.room_id == room_id && p.user_id == user_id)
        {
            participant.is_online = false;
            participant.last_seen_at = now.into();
        }
        Ok(())
    }

    async fn find_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> AppResult<Option<room_participant::Model>> {
        Ok(self
            .tables
            .lock()
            .await
            .participants
            .iter()
            .find(|p| p.room_id == room_id && p.user_id == user_id)
            .cloned())
    }

    async fn list_participants(&self, room_id: &str) -> AppResult<Vec<room_participant::Model>> {
        let mut participants: Vec<_> = self
            .tables
            .lock()
            .await
            .participants
            .iter()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }

    async fn count_online_participants(&self, room_id: &str) -> AppResult<u64> {
        Ok(self
            .tables
            .lock()
            .await
            .participants
            .iter()
            .filter(|p| p.room_id == room_id && p.is_online)
            .count() as u64)
    }

    async fn list_online_participants(&self) -> AppResult<Vec<room_participant::Model>> {
        Ok(self
            .tables
            .lock()
            .await
            .participants
            .iter()
            .filter(|p| p.is_online)
            .cloned()
            .collect())
    }

    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for participant in tables.participants.iter_mut().filter(|p| p.is_online) {
            participant.is_online = false;
            participant.last_seen_at = now.into();
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_message(&self, message: room_message::Model) -> AppResult<room_message::Model> {
        self.tables.lock().await.messages.push(message.clone());
        Ok(message)
    }

    async fn list_recent_messages(
        &self,
        room_id: &str,
        limit: u64,
    ) -> AppResult<Vec<room_message::Model>> {
        let tables = self.tables.lock().await;
        let in_room: Vec<_> = tables
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        let skip = in_room.len().saturating_sub(limit as usize);
        Ok(in_room.into_iter().skip(skip).collect())
    }

    async fn insert_poll(&self, poll: poll::Model) -> AppResult<poll::Model> {
        self.tables
            .lock()
            .await
            .polls
            .insert(poll.id.clone(), poll.clone());
        Ok(poll)
    }

    async fn find_poll(&self, poll_id: &str) -> AppResult<Option<poll::Model>> {
        Ok(self.tables.lock().await.polls.get(poll_id).cloned())
    }

    async fn find_active_poll(&self, room_id: &str) -> AppResult<Option<poll::Model>> {
        Ok(self
            .tables
            .lock()
            .await
            .polls
            .values()
            .filter(|p| p.room_id == room_id && p.status == PollStatus::Active)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn list_polls(&self, room_id: &str, limit: u64) -> AppResult<Vec<poll::Model>> {
        let mut polls: Vec<_> = self
            .tables
            .lock()
            .await
            .polls
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        polls.truncate(limit as usize);
        Ok(polls)
    }

    async fn list_active_polls(&self) -> AppResult<Vec<poll::Model>> {
        let mut polls: Vec<_> = self
            .tables
            .lock()
            .await
            .polls
            .values()
            .filter(|p| p.status == PollStatus::Active)
            .cloned()
            .collect();
        polls.sort_by_key(|p| p.expires_at);
        Ok(polls)
    }

    async fn list_overdue_polls(&self, now: DateTime<Utc>) -> AppResult<Vec<poll::Model>> {
        let mut polls: Vec<_> = self
            .tables
            .lock()
            .await
            .polls
            .values()
            .filter(|p| p.status == PollStatus::Active && p.expires_at < now)
            .cloned()
            .collect();
        polls.sort_by_key(|p| p.expires_at);
        Ok(polls)
    }

    async fn count_polls_since(&self, room_id: &str, since: DateTime<Utc>) -> AppResult<u64> {
        Ok(self
            .tables
            .lock()
            .await
            .polls
            .values()
            .filter(|p| p.room_id == room_id && p.created_at >= since)
            .count() as u64)
    }

    async fn finish_poll(
        &self,
        poll_id: &str,
        status: PollStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<poll::Model>> {
        match self.tables.lock().await.polls.get_mut(poll_id) {
            Some(poll) if poll.status == PollStatus::Active => {
                poll.status = status;
                poll.closed_at = Some(now.into());
                Ok(Some(poll.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_vote(
        &self,
        vote: poll_vote::Model,
        now: DateTime<Utc>,
    ) -> AppResult<poll_vote::Model> {
        let mut tables = self.tables.lock().await;
        let poll = tables
            .polls
            .get(&vote.poll_id)
            .ok_or_else(|| AppError::NotFound(format!("Poll not found: {}", vote.poll_id)))?;
        if !poll.is_open_at(now.into()) {
            return Err(AppError::Conflict("Poll is no longer active".to_string()));
        }
        if tables
            .votes
            .iter()
            .any(|v| v.poll_id == vote.poll_id && v.user_id == vote.user_id)
        {
            return Err(AppError::Conflict("Already voted".to_string()));
        }
        tables.votes.push(vote.clone());
        Ok(vote)
    }

    async fn tally_votes(&self, poll_id: &str) -> AppResult<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for vote in self
            .tables
            .lock()
            .await
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id)
        {
            *counts.entry(vote.option_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn activity_counts(&self, room_id: &str) -> AppResult<ActivityCounts> {
        let tables = self.tables.lock().await;
        let mut counts = ActivityCounts::default();

        for message in tables.messages.iter().filter(|m| m.room_id == room_id) {
            if let Some(user_id) = &message.user_id {
                *counts.messages.entry(user_id.clone()).or_insert(0) += 1;
            }
        }
        for poll in tables.polls.values().filter(|p| p.room_id == room_id) {
            *counts.polls_created.entry(poll.creator_id.clone()).or_insert(0) += 1;
        }
        for vote in &tables.votes {
            let in_room = tables
                .polls
                .get(&vote.poll_id)
                .is_some_and(|p| p.room_id == room_id);
            if in_room {
                *counts.votes.entry(vote.user_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
