//! Poll entity for room polls.

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What a poll decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PollType {
    /// The winning option switches the room's companion mode.
    #[sea_orm(string_value = "personality_mode")]
    PersonalityMode,
    /// Picks the next conversation topic.
    #[sea_orm(string_value = "topic")]
    Topic,
    #[sea_orm(string_value = "custom")]
    Custom,
}

/// Poll lifecycle state. `Closed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    #[sea_orm(string_value = "active")]
    Active,
    /// Closed manually by its creator.
    #[sea_orm(string_value = "closed")]
    Closed,
    /// Reached its deadline.
    #[sea_orm(string_value = "expired")]
    Expired,
}

/// A single answer of a poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    /// `option_1`, `option_2`, ... in declaration order.
    pub id: String,
    pub text: String,
}

/// Ordered answers of a poll, stored as a JSON array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct PollOptions(pub Vec<PollOption>);

impl PollOptions {
    /// Build options from their texts, assigning sequential ids.
    #[must_use]
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            texts
                .into_iter()
                .enumerate()
                .map(|(i, text)| PollOption {
                    id: format!("option_{}", i + 1),
                    text: text.into(),
                })
                .collect(),
        )
    }

    /// Find an option by id.
    #[must_use]
    pub fn get(&self, option_id: &str) -> Option<&PollOption> {
        self.0.iter().find(|o| o.id == option_id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PollOption> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "poll")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub room_id: String,

    /// Only the creator may close the poll manually.
    pub creator_id: String,

    pub poll_type: PollType,

    #[sea_orm(column_type = "Text")]
    pub question: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub options: PollOptions,

    pub duration_seconds: i32,

    pub status: PollStatus,

    pub created_at: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub closed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether votes may still be accepted at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTimeWithTimeZone) -> bool {
        self.status == PollStatus::Active && now < self.expires_at
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::room::Entity",
        from = "Column::RoomId",
        to = "super::room::Column::Id",
        on_delete = "Cascade"
    )]
    Room,

    #[sea_orm(has_many = "super::poll_vote::Entity")]
    Votes,
}

impl Related<super::room::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Room.def()
    }
}

impl Related<super::poll_vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Votes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
