//! Room repository.

use std::sync::Arc;

use crate::entities::{Room, room};
use chrono::{DateTime, Utc};
use lounge_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    sea_query::Expr,
};

use super::map_insert_err;

/// Room repository for database operations.
#[derive(Clone)]
pub struct RoomRepository {
    db: Arc<DatabaseConnection>,
}

impl RoomRepository {
    /// Create a new room repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a room by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<room::Model>> {
        Room::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a room by ID, returning error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<room::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room not found: {id}")))
    }

    /// Find a room by its public code.
    pub async fn find_by_code(&self, code: &str) -> AppResult<Option<room::Model>> {
        Room::find()
            .filter(room::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new room. A taken code yields [`AppError::Conflict`].
    pub async fn create(&self, model: room::ActiveModel) -> AppResult<room::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| map_insert_err(e, "Room code already in use"))
    }

    /// Count active rooms owned by a host.
    pub async fn count_active_by_host(&self, host_id: &str) -> AppResult<u64> {
        Room::find()
            .filter(room::Column::HostId.eq(host_id))
            .filter(room::Column::IsActive.eq(true))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Persist the room's current mode.
    pub async fn update_mode(&self, id: &str, mode: &str, now: DateTime<Utc>) -> AppResult<()> {
        Room::update_many()
            .col_expr(room::Column::CurrentMode, Expr::value(mode))
            .col_expr(room::Column::UpdatedAt, Expr::value(now))
            .col_expr(room::Column::LastActivityAt, Expr::value(now))
            .filter(room::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Record activity in a room.
    pub async fn touch(&self, id: &str, now: DateTime<Utc>) -> AppResult<()> {
        Room::update_many()
            .col_expr(room::Column::LastActivityAt, Expr::value(now))
            .filter(room::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Soft-delete a room. Returns `false` if it was already inactive.
    pub async fn deactivate(&self, id: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let result = Room::update_many()
            .col_expr(room::Column::IsActive, Expr::value(false))
            .col_expr(room::Column::UpdatedAt, Expr::value(now))
            .filter(room::Column::Id.eq(id))
            .filter(room::Column::IsActive.eq(true))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }
}
