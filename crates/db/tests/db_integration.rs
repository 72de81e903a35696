//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `lounge_test`)
//!   `TEST_DB_PASSWORD` (default: `lounge_test`)
//!   `TEST_DB_NAME` (default: `lounge_test`)

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use lounge_common::AppError;
use lounge_db::entities::poll::{self, PollOptions, PollStatus, PollType};
use lounge_db::entities::{poll_vote, room};
use lounge_db::repositories::{
    ParticipantRepository, PollRepository, PollVoteRepository, RoomRepository,
};
use lounge_db::test_utils::{TestDatabase, TestDbConfig};
use sea_orm::{DatabaseConnection, Set};

async fn migrated_db() -> (TestDbConfig, Arc<DatabaseConnection>) {
    let db = TestDatabase::create_unique().await.unwrap();
    lounge_db::migrate(db.connection()).await.unwrap();
    let (conn, config) = db.into_shared();
    (config, conn)
}

fn room_model(id: &str, code: &str) -> room::ActiveModel {
    let now = Utc::now();
    room::ActiveModel {
        id: Set(id.to_string()),
        code: Set(code.to_string()),
        name: Set(None),
        host_id: Set("host".to_string()),
        max_participants: Set(4),
        current_mode: Set(room::DEFAULT_MODE.to_string()),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        last_activity_at: Set(now.into()),
    }
}

fn poll_model(id: &str, room_id: &str) -> poll::ActiveModel {
    let now = Utc::now();
    poll::ActiveModel {
        id: Set(id.to_string()),
        room_id: Set(room_id.to_string()),
        creator_id: Set("host".to_string()),
        poll_type: Set(PollType::Topic),
        question: Set("Next topic?".to_string()),
        options: Set(PollOptions::from_texts(["Movies", "Games"])),
        duration_seconds: Set(60),
        status: Set(PollStatus::Active),
        created_at: Set(now.into()),
        expires_at: Set((now + Duration::seconds(60)).into()),
        closed_at: Set(None),
    }
}

fn vote_model(id: &str, poll_id: &str, user_id: &str) -> poll_vote::ActiveModel {
    poll_vote::ActiveModel {
        id: Set(id.to_string()),
        poll_id: Set(poll_id.to_string()),
        user_id: Set(user_id.to_string()),
        option_id: Set("option_1".to_string()),
        created_at: Set(Utc::now().into()),
    }
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_database_connection() {
    let config = TestDbConfig::default();
    let result = TestDatabase::with_config(config).await;
    assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_duplicate_room_code_is_conflict() {
    let (config, conn) = migrated_db().await;
    let repo = RoomRepository::new(conn);

    repo.create(room_model("room1", "AAAAAA")).await.unwrap();
    let result = repo.create(room_model("room2", "AAAAAA")).await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    config.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_participant_rejoin_keeps_single_row() {
    let (config, conn) = migrated_db().await;
    RoomRepository::new(conn.clone())
        .create(room_model("room1", "BBBBBB"))
        .await
        .unwrap();
    let repo = ParticipantRepository::new(conn);

    let first = repo
        .set_online("p1".to_string(), "room1", "alice", "Alice", Utc::now())
        .await
        .unwrap();
    repo.set_offline("room1", "alice", Utc::now()).await.unwrap();
    let second = repo
        .set_online("p2".to_string(), "room1", "alice", "Alice", Utc::now())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(repo.find_by_room("room1").await.unwrap().len(), 1);
    assert_eq!(repo.count_online("room1").await.unwrap(), 1);
    config.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_concurrent_duplicate_votes_accept_one() {
    let (config, conn) = migrated_db().await;
    RoomRepository::new(conn.clone())
        .create(room_model("room1", "CCCCCC"))
        .await
        .unwrap();
    PollRepository::new(conn.clone())
        .create(poll_model("poll1", "room1"))
        .await
        .unwrap();
    let votes = PollVoteRepository::new(conn);

    let now = Utc::now();
    let (a, b) = tokio::join!(
        votes.cast(vote_model("v1", "poll1", "alice"), "poll1", now),
        votes.cast(vote_model("v2", "poll1", "alice"), "poll1", now),
    );

    assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
    let rejected = if a.is_err() { a } else { b };
    assert!(matches!(rejected, Err(AppError::Conflict(_))));
    assert_eq!(votes.tally("poll1").await.unwrap(), vec![("option_1".to_string(), 1)]);
    config.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_finish_transitions_once() {
    let (config, conn) = migrated_db().await;
    RoomRepository::new(conn.clone())
        .create(room_model("room1", "DDDDDD"))
        .await
        .unwrap();
    let polls = PollRepository::new(conn);
    polls.create(poll_model("poll1", "room1")).await.unwrap();

    let closed = polls.finish("poll1", PollStatus::Closed, Utc::now()).await.unwrap();
    let expired = polls.finish("poll1", PollStatus::Expired, Utc::now()).await.unwrap();

    assert_eq!(closed.unwrap().status, PollStatus::Closed);
    assert!(expired.is_none());
    config.drop_database().await.unwrap();
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(!config.username.is_empty());
    assert!(!config.database.is_empty());
}
