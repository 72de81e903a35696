//! Create `room`, `room_participant`, and `room_message` tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Room::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Room::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Room::Code).string_len(6).not_null())
                    .col(ColumnDef::new(Room::Name).string_len(64))
                    .col(ColumnDef::new(Room::HostId).string_len(64).not_null())
                    .col(
                        ColumnDef::new(Room::MaxParticipants)
                            .integer()
                            .not_null()
                            .default(10),
                    )
                    .col(
                        ColumnDef::new(Room::CurrentMode)
                            .string_len(32)
                            .not_null()
                            .default("default"),
                    )
                    .col(
                        ColumnDef::new(Room::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Room::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Room::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Room::LastActivityAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Room codes are the public join handle
        manager
            .create_index(
                Index::create()
                    .name("idx_room_code_unique")
                    .table(Room::Table)
                    .col(Room::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Host quota checks
        manager
            .create_index(
                Index::create()
                    .name("idx_room_host_id_is_active")
                    .table(Room::Table)
                    .col(Room::HostId)
                    .col(Room::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RoomParticipant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoomParticipant::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RoomParticipant::RoomId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RoomParticipant::UserId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RoomParticipant::DisplayName)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RoomParticipant::IsOnline)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RoomParticipant::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RoomParticipant::LastSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_room_participant_room")
                            .from(RoomParticipant::Table, RoomParticipant::RoomId)
                            .to(Room::Table, Room::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One membership row per (room_id, user_id)
        manager
            .create_index(
                Index::create()
                    .name("idx_room_participant_unique")
                    .table(RoomParticipant::Table)
                    .col(RoomParticipant::RoomId)
                    .col(RoomParticipant::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_room_participant_is_online")
                    .table(RoomParticipant::Table)
                    .col(RoomParticipant::IsOnline)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RoomMessage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoomMessage::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RoomMessage::RoomId).string_len(32).not_null())
                    .col(ColumnDef::new(RoomMessage::UserId).string_len(64))
                    .col(
                        ColumnDef::new(RoomMessage::Kind)
                            .string_len(16)
                            .not_null()
                            .default("text"),
                    )
                    .col(ColumnDef::new(RoomMessage::Content).text().not_null())
                    .col(ColumnDef::new(RoomMessage::Metadata).json_binary())
                    .col(
                        ColumnDef::new(RoomMessage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_room_message_room")
                            .from(RoomMessage::Table, RoomMessage::RoomId)
                            .to(Room::Table, Room::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Recent message listing
        manager
            .create_index(
                Index::create()
                    .name("idx_room_message_room_id_created_at")
                    .table(RoomMessage::Table)
                    .col(RoomMessage::RoomId)
                    .col(RoomMessage::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RoomMessage::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoomParticipant::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Room::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Room {
    Table,
    Id,
    Code,
    Name,
    HostId,
    MaxParticipants,
    CurrentMode,
    IsActive,
    CreatedAt,
    UpdatedAt,
    LastActivityAt,
}

#[derive(Iden)]
enum RoomParticipant {
    Table,
    Id,
    RoomId,
    UserId,
    DisplayName,
    IsOnline,
    JoinedAt,
    LastSeenAt,
}

#[derive(Iden)]
enum RoomMessage {
    Table,
    Id,
    RoomId,
    UserId,
    Kind,
    Content,
    Metadata,
    CreatedAt,
}
