//! Room entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Mode tag of a freshly created room.
pub const DEFAULT_MODE: &str = "default";

/// A capacity-bounded real-time space identified by a short public code.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "room")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Public join code (six uppercase alphanumerics).
    #[sea_orm(unique)]
    pub code: String,

    #[sea_orm(nullable)]
    pub name: Option<String>,

    /// User who created the room.
    #[sea_orm(indexed)]
    pub host_id: String,

    pub max_participants: i32,

    /// Active companion personality.
    pub current_mode: String,

    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub last_activity_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::room_participant::Entity")]
    Participants,

    #[sea_orm(has_many = "super::room_message::Entity")]
    Messages,

    #[sea_orm(has_many = "super::poll::Entity")]
    Polls,
}

impl Related<super::room_participant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl Related<super::room_message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl Related<super::poll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Polls.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
