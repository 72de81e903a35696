//! Queue integration tests.
//!
//! The scheduler drives real maintenance jobs over the in-memory store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lounge_common::ManualClock;
use lounge_core::{
    BroadcastDispatcher, ConnectionHandle, CreatePollInput, CreateRoomInput, ExpirationScheduler,
    MemoryRoomStore, PollService, RoomEvent, RoomRegistry, RoomStore,
};
use lounge_db::entities::poll::{PollStatus, PollType};
use lounge_queue::{RoomMaintenance, SchedulerConfig, run_scheduler};

#[tokio::test(start_paused = true)]
async fn test_sweep_and_timer_expire_poll_once() {
    let store = Arc::new(MemoryRoomStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let dispatcher = BroadcastDispatcher::default();
    let rooms = RoomRegistry::new(store.clone(), dispatcher.clone(), clock.clone());
    let (scheduler, fired) = ExpirationScheduler::new();
    let polls = PollService::new(
        store.clone(),
        rooms.clone(),
        dispatcher,
        scheduler,
        clock.clone(),
    );
    let _worker = polls.spawn_expiration_worker(fired);

    let room = rooms
        .create_room(
            "host",
            CreateRoomInput {
                name: None,
                max_participants: 4,
            },
        )
        .await
        .unwrap();
    let mut joined = rooms
        .join_room(&room.id, "host", "Host", &ConnectionHandle::new())
        .await
        .unwrap();
    let poll = polls
        .create_poll(
            &room.id,
            "host",
            CreatePollInput {
                poll_type: PollType::Topic,
                question: "Where to?".to_string(),
                options: vec!["Beach".to_string(), "Hills".to_string()],
                duration_seconds: 30,
            },
        )
        .await
        .unwrap();

    // The wall clock runs ahead of the timer so the sweep gets there first.
    clock.advance(chrono::Duration::seconds(31));

    let config = SchedulerConfig {
        poll_sweep_interval: Duration::from_secs(5),
        presence_reap_interval: Duration::from_secs(3600),
    };
    let handles = run_scheduler(
        &config,
        Arc::new(RoomMaintenance::new(polls.clone(), rooms.clone())),
    );

    tokio::time::sleep(Duration::from_secs(6)).await;
    let stored = store.find_poll(&poll.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PollStatus::Expired);

    // Let the original timer fire too.
    tokio::time::sleep(Duration::from_secs(40)).await;

    let mut expired = 0;
    while let Ok(event) = joined.events.try_recv() {
        if matches!(event.as_ref(), RoomEvent::PollExpired { .. }) {
            expired += 1;
        }
    }
    assert_eq!(expired, 1);

    for handle in handles {
        handle.abort();
    }
}
