//! Create `poll` and `poll_vote` tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Poll::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Poll::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Poll::RoomId).string_len(32).not_null())
                    .col(ColumnDef::new(Poll::CreatorId).string_len(64).not_null())
                    .col(
                        ColumnDef::new(Poll::PollType)
                            .string_len(16)
                            .not_null()
                            .default("custom"),
                    )
                    .col(ColumnDef::new(Poll::Question).text().not_null())
                    .col(
                        ColumnDef::new(Poll::Options)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(Poll::DurationSeconds).integer().not_null())
                    .col(
                        ColumnDef::new(Poll::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Poll::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Poll::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Poll::ClosedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_poll_room")
                            .from(Poll::Table, Poll::RoomId)
                            .to(Room::Table, Room::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Rate limit window and history listing
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_room_id_created_at")
                    .table(Poll::Table)
                    .col(Poll::RoomId)
                    .col(Poll::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Reconciliation sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_status_expires_at")
                    .table(Poll::Table)
                    .col(Poll::Status)
                    .col(Poll::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PollVote::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PollVote::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PollVote::PollId).string_len(32).not_null())
                    .col(ColumnDef::new(PollVote::UserId).string_len(64).not_null())
                    .col(ColumnDef::new(PollVote::OptionId).string_len(16).not_null())
                    .col(
                        ColumnDef::new(PollVote::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_poll_vote_poll")
                            .from(PollVote::Table, PollVote::PollId)
                            .to(Poll::Table, Poll::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one vote per (poll_id, user_id)
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_vote_unique")
                    .table(PollVote::Table)
                    .col(PollVote::PollId)
                    .col(PollVote::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PollVote::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Poll::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
    RoomId,
    CreatorId,
    PollType,
    Question,
    Options,
    DurationSeconds,
    Status,
    CreatedAt,
    ExpiresAt,
    ClosedAt,
}

#[derive(Iden)]
enum PollVote {
    Table,
    Id,
    PollId,
    UserId,
    OptionId,
    CreatedAt,
}

#[derive(Iden)]
enum Room {
    Table,
    Id,
}
