//! Room participant entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Membership of a user in a room, with presence.
///
/// There is exactly one row per (room, user); reconnecting flips `is_online`
/// back on instead of inserting a second row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "room_participant")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub room_id: String,

    #[sea_orm(indexed)]
    pub user_id: String,

    pub display_name: String,

    pub is_online: bool,

    pub joined_at: DateTimeWithTimeZone,

    pub last_seen_at: DateTimeWithTimeZone,
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
}

impl Related<super::room::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Room.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
