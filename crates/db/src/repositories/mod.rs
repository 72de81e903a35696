//! Database repositories.

use lounge_common::AppError;
use sea_orm::{DbErr, SqlErr};

mod participant;
mod poll;
mod room;
mod room_message;

pub use participant::ParticipantRepository;
pub use poll::{PollRepository, PollVoteRepository};
pub use room::RoomRepository;
pub use room_message::RoomMessageRepository;

/// Map an insert error, turning unique key violations into [`AppError::Conflict`].
pub(crate) fn map_insert_err(e: DbErr, conflict: &str) -> AppError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Conflict(conflict.to_string()),
        _ => AppError::Database(e.to_string()),
    }
}
