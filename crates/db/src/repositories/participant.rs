//! Room participant repository.

use std::sync::Arc;

use crate::entities::{RoomParticipant, room_participant};
use chrono::{DateTime, Utc};
use lounge_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set, sea_query::Expr,
};

use super::map_insert_err;

/// Participant repository for database operations.
#[derive(Clone)]
pub struct ParticipantRepository {
    db: Arc<DatabaseConnection>,
}

impl ParticipantRepository {
    /// Create a new participant repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the membership row of a user in a room.
    pub async fn find(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> AppResult<Option<room_participant::Model>> {
        RoomParticipant::find()
            .filter(room_participant::Column::RoomId.eq(room_id))
            .filter(room_participant::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List every participant of a room, earliest joiner first.
    pub async fn find_by_room(&self, room_id: &str) -> AppResult<Vec<room_participant::Model>> {
        RoomParticipant::find()
            .filter(room_participant::Column::RoomId.eq(room_id))
            .order_by_asc(room_participant::Column::JoinedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count online participants of a room.
    pub async fn count_online(&self, room_id: &str) -> AppResult<u64> {
        RoomParticipant::find()
            .filter(room_participant::Column::RoomId.eq(room_id))
            .filter(room_participant::Column::IsOnline.eq(true))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All rows currently flagged online, across rooms.
    pub async fn find_online(&self) -> AppResult<Vec<room_participant::Model>> {
        RoomParticipant::find()
            .filter(room_participant::Column::IsOnline.eq(true))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create the membership row or flip an existing one back online.
    pub async fn set_online(
        &self,
        id: String,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<room_participant::Model> {
        if let Some(existing) = self.find(room_id, user_id).await? {
            return self.mark_online(existing, display_name, now).await;
        }

        let model = room_participant::ActiveModel {
            id: Set(id),
            room_id: Set(room_id.to_string()),
            user_id: Set(user_id.to_string()),
            display_name: Set(display_name.to_string()),
            is_online: Set(true),
            joined_at: Set(now.into()),
            last_seen_at: Set(now.into()),
        };

        match model.insert(self.db.as_ref()).await {
            Ok(created) => Ok(created),
            Err(e) => match map_insert_err(e, "Participant already exists") {
                // Lost an insert race against another join of the same user.
                AppError::Conflict(_) => {
                    let existing = self.find(room_id, user_id).await?.ok_or_else(|| {
                        AppError::Internal("Participant vanished after conflict".to_string())
                    })?;
                    self.mark_online(existing, display_name, now).await
                }
                other => Err(other),
            },
        }
    }

    async fn mark_online(
        &self,
        existing: room_participant::Model,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<room_participant::Model> {
        let mut active = existing.into_active_model();
        active.display_name = Set(display_name.to_string());
        active.is_online = Set(true);
        active.last_seen_at = Set(now.into());
        active
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Flag a participant offline.
    pub async fn set_offline(&self, room_id: &str, user_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        RoomParticipant::update_many()
            .col_expr(room_participant::Column::IsOnline, Expr::value(false))
            .col_expr(room_participant::Column::LastSeenAt, Expr::value(now))
            .filter(room_participant::Column::RoomId.eq(room_id))
            .filter(room_participant::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Flag every participant of every room offline.
    pub async fn set_all_offline(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = RoomParticipant::update_many()
            .col_expr(room_participant::Column::IsOnline, Expr::value(false))
            .col_expr(room_participant::Column::LastSeenAt, Expr::value(now))
            .filter(room_participant::Column::IsOnline.eq(true))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
