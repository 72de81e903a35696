//! Room message repository.

use std::sync::Arc;

use crate::entities::{RoomMessage, room_message};
use lounge_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

/// Room message repository for database operations.
#[derive(Clone)]
pub struct RoomMessageRepository {
    db: Arc<DatabaseConnection>,
}

impl RoomMessageRepository {
    /// Create a new room message repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new message.
    pub async fn create(&self, model: room_message::ActiveModel) -> AppResult<room_message::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Most recent messages of a room, returned oldest first.
    pub async fn find_recent(
        &self,
        room_id: &str,
        limit: u64,
    ) -> AppResult<Vec<room_message::Model>> {
        let mut messages = RoomMessage::find()
            .filter(room_message::Column::RoomId.eq(room_id))
            .order_by_desc(room_message::Column::CreatedAt)
            .order_by_desc(room_message::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        messages.reverse();
        Ok(messages)
    }

    /// Number of non-system messages per author in a room.
    pub async fn count_by_author(&self, room_id: &str) -> AppResult<Vec<(String, i64)>> {
        RoomMessage::find()
            .select_only()
            .column(room_message::Column::UserId)
            .column_as(room_message::Column::Id.count(), "count")
            .filter(room_message::Column::RoomId.eq(room_id))
            .filter(room_message::Column::UserId.is_not_null())
            .group_by(room_message::Column::UserId)
            .into_tuple::<(String, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
