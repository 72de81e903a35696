//! Poll repository.

use std::sync::Arc;

use crate::entities::{
    Poll, PollVote,
    poll::{self, PollStatus},
    poll_vote,
};
use chrono::{DateTime, Utc};
use lounge_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait, sea_query::Expr,
};

use super::map_insert_err;

/// Poll repository for database operations.
#[derive(Clone)]
pub struct PollRepository {
    db: Arc<DatabaseConnection>,
}

impl PollRepository {
    /// Create a new poll repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a poll by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<poll::Model>> {
        Poll::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new poll.
    pub async fn create(&self, model: poll::ActiveModel) -> AppResult<poll::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Most recently created active poll of a room.
    pub async fn find_active_by_room(&self, room_id: &str) -> AppResult<Option<poll::Model>> {
        Poll::find()
            .filter(poll::Column::RoomId.eq(room_id))
            .filter(poll::Column::Status.eq(PollStatus::Active))
            .order_by_desc(poll::Column::CreatedAt)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Polls of a room, newest first.
    pub async fn find_by_room(&self, room_id: &str, limit: u64) -> AppResult<Vec<poll::Model>> {
        Poll::find()
            .filter(poll::Column::RoomId.eq(room_id))
            .order_by_desc(poll::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Every active poll, across rooms.
    pub async fn find_all_active(&self) -> AppResult<Vec<poll::Model>> {
        Poll::find()
            .filter(poll::Column::Status.eq(PollStatus::Active))
            .order_by_asc(poll::Column::ExpiresAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active polls whose deadline has passed.
    pub async fn find_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<poll::Model>> {
        Poll::find()
            .filter(poll::Column::Status.eq(PollStatus::Active))
            .filter(poll::Column::ExpiresAt.lt(now))
            .order_by_asc(poll::Column::ExpiresAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count polls created in a room at or after `since`.
    pub async fn count_created_since(&self, room_id: &str, since: DateTime<Utc>) -> AppResult<u64> {
        Poll::find()
            .filter(poll::Column::RoomId.eq(room_id))
            .filter(poll::Column::CreatedAt.gte(since))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Move an active poll into a terminal status.
    ///
    /// Returns `None` when the poll was no longer active, so that only one
    /// of several concurrent transitions wins.
    pub async fn finish(
        &self,
        id: &str,
        status: PollStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<poll::Model>> {
        let result = Poll::update_many()
            .col_expr(poll::Column::Status, Expr::value(status))
            .col_expr(poll::Column::ClosedAt, Expr::value(now))
            .filter(poll::Column::Id.eq(id))
            .filter(poll::Column::Status.eq(PollStatus::Active))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Number of polls created per user in a room.
    pub async fn count_by_creator(&self, room_id: &str) -> AppResult<Vec<(String, i64)>> {
        Poll::find()
            .select_only()
            .column(poll::Column::CreatorId)
            .column_as(poll::Column::Id.count(), "count")
            .filter(poll::Column::RoomId.eq(room_id))
            .group_by(poll::Column::CreatorId)
            .into_tuple::<(String, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

/// Poll vote repository for database operations.
#[derive(Clone)]
pub struct PollVoteRepository {
    db: Arc<DatabaseConnection>,
}

impl PollVoteRepository {
    /// Create a new poll vote repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record a vote.
    ///
    /// The poll row is locked for the duration of the insert, so a vote and a
    /// status transition of the same poll never interleave. A second vote of
    /// the same user is rejected by the `(poll_id, user_id)` unique index.
    pub async fn cast(
        &self,
        model: poll_vote::ActiveModel,
        poll_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<poll_vote::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let poll = Poll::find_by_id(poll_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Poll not found: {poll_id}")))?;

        if !poll.is_open_at(now.into()) {
            return Err(AppError::Conflict("Poll is no longer active".to_string()));
        }

        let vote = model
            .insert(&txn)
            .await
            .map_err(|e| map_insert_err(e, "Already voted"))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(vote)
    }

    /// Vote count per option of a poll.
    pub async fn tally(&self, poll_id: &str) -> AppResult<Vec<(String, i64)>> {
        PollVote::find()
            .select_only()
            .column(poll_vote::Column::OptionId)
            .column_as(poll_vote::Column::Id.count(), "count")
            .filter(poll_vote::Column::PollId.eq(poll_id))
            .group_by(poll_vote::Column::OptionId)
            .into_tuple::<(String, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Number of votes per user across all polls of a room.
    pub async fn count_by_voter_in_room(&self, room_id: &str) -> AppResult<Vec<(String, i64)>> {
        PollVote::find()
            .inner_join(Poll)
            .select_only()
            .column(poll_vote::Column::UserId)
            .column_as(poll_vote::Column::Id.count(), "count")
            .filter(poll::Column::RoomId.eq(room_id))
            .group_by(poll_vote::Column::UserId)
            .into_tuple::<(String, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::poll::{PollOptions, PollType};
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Set};

    fn create_test_poll(id: &str, status: PollStatus, expires_in_secs: i64) -> poll::Model {
        let now = Utc::now();
        poll::Model {
            id: id.to_string(),
            room_id: "room1".to_string(),
            creator_id: "host".to_string(),
            poll_type: PollType::Custom,
            question: "Pizza or tacos?".to_string(),
            options: PollOptions::from_texts(["Pizza", "Tacos"]),
            duration_seconds: 60,
            status,
            created_at: now.into(),
            expires_at: (now + Duration::seconds(expires_in_secs)).into(),
            closed_at: None,
        }
    }

    fn vote_model(poll_id: &str, user_id: &str) -> poll_vote::ActiveModel {
        poll_vote::ActiveModel {
            id: Set(format!("v-{user_id}")),
            poll_id: Set(poll_id.to_string()),
            user_id: Set(user_id.to_string()),
            option_id: Set("option_1".to_string()),
            created_at: Set(Utc::now().into()),
        }
    }

    #[tokio::test]
    async fn test_finish_loses_race() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = PollRepository::new(db);
        let result = repo
            .finish("poll1", PollStatus::Expired, Utc::now())
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_finish_returns_updated_poll() {
        let closed = create_test_poll("poll1", PollStatus::Closed, 30);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .append_query_results([[closed]])
                .into_connection(),
        );

        let repo = PollRepository::new(db);
        let result = repo
            .finish("poll1", PollStatus::Closed, Utc::now())
            .await
            .unwrap();

        assert_eq!(result.unwrap().status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn test_cast_rejects_closed_poll() {
        let closed = create_test_poll("poll1", PollStatus::Closed, 30);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[closed]])
                .into_connection(),
        );

        let repo = PollVoteRepository::new(db);
        let result = repo
            .cast(vote_model("poll1", "alice"), "poll1", Utc::now())
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cast_rejects_past_deadline() {
        let overdue = create_test_poll("poll1", PollStatus::Active, -1);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[overdue]])
                .into_connection(),
        );

        let repo = PollVoteRepository::new(db);
        let result = repo
            .cast(vote_model("poll1", "alice"), "poll1", Utc::now())
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cast_inserts_vote() {
        let active = create_test_poll("poll1", PollStatus::Active, 30);
        let vote = poll_vote::Model {
            id: "v-alice".to_string(),
            poll_id: "poll1".to_string(),
            user_id: "alice".to_string(),
            option_id: "option_1".to_string(),
            created_at: Utc::now().into(),
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[active]])
                .append_query_results([[vote.clone()]])
                .into_connection(),
        );

        let repo = PollVoteRepository::new(db);
        let result = repo
            .cast(vote_model("poll1", "alice"), "poll1", Utc::now())
            .await
            .unwrap();

        assert_eq!(result, vote);
    }
}
