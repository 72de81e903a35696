//! Durable store gateway.
//!
//! Rooms, participants, messages, polls and votes are persisted through
//! [`RoomStore`]. Everything the registry and the poll engine keep in memory
//! is a projection of what this store holds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lounge_common::AppResult;
use lounge_db::{
    entities::{
        poll::{self, PollStatus},
        poll_vote, room, room_message, room_participant,
    },
    repositories::{
        ParticipantRepository, PollRepository, PollVoteRepository, RoomMessageRepository,
        RoomRepository,
    },
};
use sea_orm::{DatabaseConnection, Set};

/// Per-user activity counters of a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    /// Messages sent, keyed by user id. System messages are not counted.
    pub messages: HashMap<String, u64>,
    /// Votes cast in the room's polls, keyed by user id.
    pub votes: HashMap<String, u64>,
    /// Polls created, keyed by user id.
    pub polls_created: HashMap<String, u64>,
}

/// Persistence operations needed by rooms and polls.
///
/// Implementations must enforce uniqueness of room codes, of
/// (room, user) memberships and of (poll, user) votes atomically, and must
/// guard poll status transitions with a `status = active` precondition.
#[async_trait]
pub trait RoomStore: Send + Sync {
    // === Rooms ===

    /// Insert a room. A taken code yields `Conflict`.
    async fn insert_room(&self, room: room::Model) -> AppResult<room::Model>;

    async fn find_room(&self, room_id: &str) -> AppResult<Option<room::Model>>;

    async fn find_room_by_code(&self, code: &str) -> AppResult<Option<room::Model>>;

    async fn count_active_rooms_by_host(&self, host_id: &str) -> AppResult<u64>;

    async fn update_room_mode(&self, room_id: &str, mode: &str, now: DateTime<Utc>)
    -> AppResult<()>;

    async fn touch_room(&self, room_id: &str, now: DateTime<Utc>) -> AppResult<()>;

    /// Soft-delete. Returns `false` if the room was already inactive.
    async fn deactivate_room(&self, room_id: &str, now: DateTime<Utc>) -> AppResult<bool>;

    // === Participants ===

    /// Create the membership row, or flip the existing one back online.
    async fn set_participant_online(
        &self,
        participant_id: String,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<room_participant::Model>;

    async fn set_participant_offline(
        &self,
        room_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn find_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> AppResult<Option<room_participant::Model>>;

    async fn list_participants(&self, room_id: &str) -> AppResult<Vec<room_participant::Model>>;

    async fn count_online_participants(&self, room_id: &str) -> AppResult<u64>;

    /// Participants flagged online in any room.
    async fn list_online_participants(&self) -> AppResult<Vec<room_participant::Model>>;

    /// Flag everyone offline. Returns the number of rows changed.
    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64>;

    // === Messages ===

    async fn insert_message(&self, message: room_message::Model) -> AppResult<room_message::Model>;

    /// Most recent messages, oldest first.
    async fn list_recent_messages(
        &self,
        room_id: &str,
        limit: u64,
    ) -> AppResult<Vec<room_message::Model>>;

    // === Polls ===

    async fn insert_poll(&self, poll: poll::Model) -> AppResult<poll::Model>;

    async fn find_poll(&self, poll_id: &str) -> AppResult<Option<poll::Model>>;

    /// Most recently created active poll of a room.
    async fn find_active_poll(&self, room_id: &str) -> AppResult<Option<poll::Model>>;

    /// Polls of a room, newest first.
    async fn list_polls(&self, room_id: &str, limit: u64) -> AppResult<Vec<poll::Model>>;

    async fn list_active_polls(&self) -> AppResult<Vec<poll::Model>>;

    /// Active polls with `expires_at < now`.
    async fn list_overdue_polls(&self, now: DateTime<Utc>) -> AppResult<Vec<poll::Model>>;

    async fn count_polls_since(&self, room_id: &str, since: DateTime<Utc>) -> AppResult<u64>;

    /// Move an active poll to a terminal status. `None` if it was not active.
    async fn finish_poll(
        &self,
        poll_id: &str,
        status: PollStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<poll::Model>>;

    // === Votes ===

    /// Insert a vote after re-checking, atomically, that the poll is still
    /// open at `now`. A second vote by the same user yields `Conflict`.
    async fn insert_vote(
        &self,
        vote: poll_vote::Model,
        now: DateTime<Utc>,
    ) -> AppResult<poll_vote::Model>;

    /// Vote count per option id. Options without votes may be absent.
    async fn tally_votes(&self, poll_id: &str) -> AppResult<HashMap<String, u64>>;

    // === Stats ===

    async fn activity_counts(&self, room_id: &str) -> AppResult<ActivityCounts>;
}

/// Type alias for a shared room store.
pub type RoomStoreService = Arc<dyn RoomStore>;

/// [`RoomStore`] backed by `PostgreSQL`.
#[derive(Clone)]
pub struct DatabaseRoomStore {
    room_repo: RoomRepository,
    participant_repo: ParticipantRepository,
    message_repo: RoomMessageRepository,
    poll_repo: PollRepository,
    vote_repo: PollVoteRepository,
}

impl DatabaseRoomStore {
    /// Create a store from its repositories.
    #[must_use]
    pub const fn new(
        room_repo: RoomRepository,
        participant_repo: ParticipantRepository,
        message_repo: RoomMessageRepository,
        poll_repo: PollRepository,
        vote_repo: PollVoteRepository,
    ) -> Self {
        Self {
            room_repo,
            participant_repo,
            message_repo,
            poll_repo,
            vote_repo,
        }
    }

    /// Create a store with repositories sharing one connection pool.
    #[must_use]
    pub fn from_connection(db: Arc<DatabaseConnection>) -> Self {
        Self::new(
            RoomRepository::new(db.clone()),
            ParticipantRepository::new(db.clone()),
            RoomMessageRepository::new(db.clone()),
            PollRepository::new(db.clone()),
            PollVoteRepository::new(db),
        )
    }
}

fn to_counts(rows: Vec<(String, i64)>) -> HashMap<String, u64> {
    rows.into_iter()
        .map(|(key, count)| (key, count.max(0) as u64))
        .collect()
}

#[async_trait]
impl RoomStore for DatabaseRoomStore {
    async fn insert_room(&self, room: room::Model) -> AppResult<room::Model> {
        self.room_repo
            .create(room::ActiveModel {
                id: Set(room.id),
                code: Set(room.code),
                name: Set(room.name),
                host_id: Set(room.host_id),
                max_participants: Set(room.max_participants),
                current_mode: Set(room.current_mode),
                is_active: Set(room.is_active),
                created_at: Set(room.created_at),
                updated_at: Set(room.updated_at),
                last_activity_at: Set(room.last_activity_at),
            })
            .await
    }

    async fn find_room(&self, room_id: &str) -> AppResult<Option<room::Model>> {
        self.room_repo.find_by_id(room_id).await
    }

    async fn find_room_by_code(&self, code: &str) -> AppResult<Option<room::Model>> {
        self.room_repo.find_by_code(code).await
    }

    async fn count_active_rooms_by_host(&self, host_id: &str) -> AppResult<u64> {
        self.room_repo.count_active_by_host(host_id).await
    }

    async fn update_room_mode(
        &self,
        room_id: &str,
        mode: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.room_repo.update_mode(room_id, mode, now).await
    }

    async fn touch_room(&self, room_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        self.room_repo.touch(room_id, now).await
    }

    async fn deactivate_room(&self, room_id: &str, now: DateTime<Utc>) -> AppResult<bool> {
        self.room_repo.deactivate(room_id, now).await
    }

    async fn set_participant_online(
        &self,
        participant_id: String,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<room_participant::Model> {
        self.participant_repo
            .set_online(participant_id, room_id, user_id, display_name, now)
            .await
    }

    async fn set_participant_offline(
        &self,
        room_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.participant_repo.set_offline(room_id, user_id, now).await
    }

    async fn find_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> AppResult<Option<room_participant::Model>> {
        self.participant_repo.find(room_id, user_id).await
    }

    async fn list_participants(&self, room_id: &str) -> AppResult<Vec<room_participant::Model>> {
        self.participant_repo.find_by_room(room_id).await
    }

    async fn count_online_participants(&self, room_id: &str) -> AppResult<u64> {
        self.participant_repo.count_online(room_id).await
    }

    async fn list_online_participants(&self) -> AppResult<Vec<room_participant::Model>> {
        self.participant_repo.find_online().await
    }

    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.participant_repo.set_all_offline(now).await
    }

    async fn insert_message(&self, message: room_message::Model) -> AppResult<room_message::Model> {
        self.message_repo
            .create(room_message::ActiveModel {
                id: Set(message.id),
                room_id: Set(message.room_id),
                user_id: Set(message.user_id),
                kind: Set(message.kind),
                content: Set(message.content),
                metadata: Set(message.metadata),
                created_at: Set(message.created_at),
            })
            .await
    }

    async fn list_recent_messages(
        &self,
        room_id: &str,
        limit: u64,
    ) -> AppResult<Vec<room_message::Model>> {
        self.message_repo.find_recent(room_id, limit).await
    }

    async fn insert_poll(&self, poll: poll::Model) -> AppResult<poll::Model> {
        self.poll_repo
            .create(poll::ActiveModel {
                id: Set(poll.id),
                room_id: Set(poll.room_id),
                creator_id: Set(poll.creator_id),
                poll_type: Set(poll.poll_type),
                question: Set(poll.question),
                options: Set(poll.options),
                duration_seconds: Set(poll.duration_seconds),
                status: Set(poll.status),
                created_at: Set(poll.created_at),
                expires_at: Set(poll.expires_at),
                closed_at: Set(poll.closed_at),
            })
            .await
    }

    async fn find_poll(&self, poll_id: &str) -> AppResult<Option<poll::Model>> {
        self.poll_repo.find_by_id(poll_id).await
    }

    async fn find_active_poll(&self, room_id: &str) -> AppResult<Option<poll::Model>> {
        self.poll_repo.find_active_by_room(room_id).await
    }

    async fn list_polls(&self, room_id: &str, limit: u64) -> AppResult<Vec<poll::Model>> {
        self.poll_repo.find_by_room(room_id, limit).await
    }

    async fn list_active_polls(&self) -> AppResult<Vec<poll::Model>> {
        self.poll_repo.find_all_active().await
    }

    async fn list_overdue_polls(&self, now: DateTime<Utc>) -> AppResult<Vec<poll::Model>> {
        self.poll_repo.find_overdue(now).await
    }

    async fn count_polls_since(&self, room_id: &str, since: DateTime<Utc>) -> AppResult<u64> {
        self.poll_repo.count_created_since(room_id, since).await
    }

    async fn finish_poll(
        &self,
        poll_id: &str,
        status: PollStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<poll::Model>> {
        self.poll_repo.finish(poll_id, status, now).await
    }

    async fn insert_vote(
        &self,
        vote: poll_vote::Model,
        now: DateTime<Utc>,
    ) -> AppResult<poll_vote::Model> {
        let poll_id = vote.poll_id.clone();
        self.vote_repo
            .cast(
                poll_vote::ActiveModel {
                    id: Set(vote.id),
                    poll_id: Set(vote.poll_id),
                    user_id: Set(vote.user_id),
                    option_id: Set(vote.option_id),
                    created_at: Set(vote.created_at),
                },
                &poll_id,
                now,
            )
            .await
    }

    async fn tally_votes(&self, poll_id: &str) -> AppResult<HashMap<String, u64>> {
        Ok(to_counts(self.vote_repo.tally(poll_id).await?))
    }

    async fn activity_counts(&self, room_id: &str) -> AppResult<ActivityCounts> {
        Ok(ActivityCounts {
            messages: to_counts(self.message_repo.count_by_author(room_id).await?),
            votes: to_counts(self.vote_repo.count_by_voter_in_room(room_id).await?),
            polls_created: to_counts(self.poll_repo.count_by_creator(room_id).await?),
        })
    }
}
