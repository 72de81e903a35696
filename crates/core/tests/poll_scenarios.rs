//! End-to-end poll and room scenarios over the in-memory store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use lounge_common::{AppError, Clock, ManualClock};
use lounge_core::{
    BroadcastDispatcher, ConnectionHandle, CreatePollInput, CreateRoomInput, ExpirationScheduler,
    MemoryRoomStore, PollService, RoomEvent, RoomRegistry, RoomStore,
};
use lounge_db::entities::poll::{self, PollOptions, PollStatus, PollType};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct Harness {
    store: Arc<MemoryRoomStore>,
    clock: Arc<ManualClock>,
    registry: RoomRegistry,
    polls: PollService,
    _worker: JoinHandle<()>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryRoomStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let dispatcher = BroadcastDispatcher::default();
    let registry = RoomRegistry::new(store.clone(), dispatcher.clone(), clock.clone());
    let (scheduler, fired) = ExpirationScheduler::new();
    let polls = PollService::new(
        store.clone(),
        registry.clone(),
        dispatcher,
        scheduler,
        clock.clone(),
    );
    let worker = polls.spawn_expiration_worker(fired);

    Harness {
        store,
        clock,
        registry,
        polls,
        _worker: worker,
    }
}

fn poll_input(poll_type: PollType, options: &[&str], duration_seconds: i32) -> CreatePollInput {
    CreatePollInput {
        poll_type,
        question: "Which one?".to_string(),
        options: options.iter().map(|o| (*o).to_string()).collect(),
        duration_seconds,
    }
}

async fn room_with_listener(h: &Harness) -> (String, broadcast::Receiver<Arc<RoomEvent>>) {
    let room = h
        .registry
        .create_room(
            "host",
            CreateRoomInput {
                name: None,
                max_participants: 10,
            },
        )
        .await
        .unwrap();
    let mut joined = h
        .registry
        .join_room(&room.id, "host", "Host", &ConnectionHandle::new())
        .await
        .unwrap();
    while joined.events.try_recv().is_ok() {}
    (room.id, joined.events)
}

fn event_names(rx: &mut broadcast::Receiver<Arc<RoomEvent>>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

fn counts(results: &[lounge_core::OptionResult]) -> Vec<u64> {
    results.iter().map(|r| r.vote_count).collect()
}

#[tokio::test]
async fn test_two_votes_for_first_option() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B", "C"], 60))
        .await
        .unwrap();

    h.polls.cast_vote(&poll.id, "u1", "option_1").await.unwrap();
    let results = h.polls.cast_vote(&poll.id, "u2", "option_1").await.unwrap();

    assert_eq!(counts(&results), [2, 0, 0]);
    assert!(results[0].is_winning);
    assert_eq!(results[0].percentage, 100.0);
    assert_eq!(
        event_names(&mut events),
        ["poll.created", "poll.resultsUpdate", "poll.resultsUpdate"]
    );
}

#[tokio::test]
async fn test_second_vote_is_rejected() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B", "C"], 60))
        .await
        .unwrap();

    h.polls.cast_vote(&poll.id, "u1", "option_1").await.unwrap();
    let second = h.polls.cast_vote(&poll.id, "u1", "option_2").await;

    assert!(matches!(second, Err(AppError::Conflict(_))));
    let results = h.polls.get_poll_results(&poll.id).await.unwrap();
    assert_eq!(counts(&results), [1, 0, 0]);
}

#[tokio::test]
async fn test_only_creator_closes() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "creator", poll_input(PollType::Custom, &["A", "B"], 60))
        .await
        .unwrap();
    event_names(&mut events);

    let denied = h.polls.close_poll(&poll.id, "someone-else").await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let outcome = h.polls.close_poll(&poll.id, "creator").await.unwrap();
    assert_eq!(outcome.poll.status, PollStatus::Closed);
    assert!(outcome.poll.closed_at.is_some());
    assert!(outcome.winner.is_none());
    assert_eq!(event_names(&mut events), ["poll.closed"]);

    // terminal states are final
    assert!(matches!(
        h.polls.close_poll(&poll.id, "creator").await,
        Err(AppError::Conflict(_))
    ));
    assert!(h.polls.expire_poll(&poll.id).await.unwrap().is_none());
    assert!(matches!(
        h.polls.cast_vote(&poll.id, "u1", "option_1").await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_poll_expires_on_its_own_exactly_once() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await
        .unwrap();
    h.polls.cast_vote(&poll.id, "u1", "option_2").await.unwrap();
    event_names(&mut events);

    h.clock.advance(Duration::seconds(31));
    let expired = loop {
        let event = tokio::time::timeout(StdDuration::from_secs(60), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let RoomEvent::PollExpired { poll, results } = event.as_ref() {
            break (poll.clone(), results.clone());
        }
    };

    assert_eq!(expired.0.id, poll.id);
    assert_eq!(expired.0.status, PollStatus::Expired);
    assert_eq!(counts(&expired.1), [0, 1]);

    // the sweep runs after the timer and finds nothing left to do
    assert_eq!(h.polls.sweep_expired().await.unwrap(), 0);
    tokio::time::sleep(StdDuration::from_secs(5)).await;
    assert!(event_names(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_before_timer_announces_once() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await
        .unwrap();
    event_names(&mut events);

    // the store clock passes the deadline before the timer fires
    h.clock.advance(Duration::seconds(31));
    assert_eq!(h.polls.sweep_expired().await.unwrap(), 1);

    tokio::time::sleep(StdDuration::from_secs(60)).await;
    assert_eq!(event_names(&mut events), ["poll.expired"]);
    let stored = h.store.find_poll(&poll.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PollStatus::Expired);
}

#[tokio::test]
async fn test_third_join_rejected() {
    let h = harness();
    let room = h
        .registry
        .create_room(
            "host",
            CreateRoomInput {
                name: Some("Small".to_string()),
                max_participants: 2,
            },
        )
        .await
        .unwrap();

    for user in ["a", "b"] {
        h.registry
            .join_room(&room.id, user, user, &ConnectionHandle::new())
            .await
            .unwrap();
    }
    let third = h
        .registry
        .join_room(&room.id, "c", "c", &ConnectionHandle::new())
        .await;

    assert!(matches!(third, Err(AppError::Capacity(_))));
    assert_eq!(h.registry.online_count(&room.id).await, 2);
}

#[tokio::test]
async fn test_vote_rejections_follow_precedence() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await
        .unwrap();

    assert!(matches!(
        h.polls.cast_vote("missing", "u1", "option_1").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.polls.cast_vote(&poll.id, "u1", "option_9").await,
        Err(AppError::Validation(_))
    ));

    // past the deadline but before any timer or sweep ran
    h.clock.advance(Duration::seconds(30));
    assert!(matches!(
        h.polls.cast_vote(&poll.id, "u1", "option_9").await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_creation_is_rate_limited_per_rolling_window() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;

    for _ in 0..3 {
        let poll = h
            .polls
            .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
            .await
            .unwrap();
        h.polls.close_poll(&poll.id, "host").await.unwrap();
        h.clock.advance(Duration::seconds(5));
    }

    let fourth = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await;
    assert!(matches!(fourth, Err(AppError::RateLimited(_))));

    h.clock.advance(Duration::seconds(50));
    assert!(
        h.polls
            .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_one_active_poll_per_room() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;
    let first = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await
        .unwrap();

    let second = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    // once the first one is overdue it is expired to make room
    h.clock.advance(Duration::seconds(31));
    let replacement = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await
        .unwrap();

    let first = h.store.find_poll(&first.id).await.unwrap().unwrap();
    assert_eq!(first.status, PollStatus::Expired);
    let active = h.polls.get_active_poll(&room_id).await.unwrap().unwrap();
    assert_eq!(active.poll.id, replacement.id);
}

#[tokio::test]
async fn test_create_poll_requires_active_room() {
    let h = harness();
    let result = h
        .polls
        .create_poll("missing", "host", poll_input(PollType::Topic, &["A", "B"], 30))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_personality_poll_switches_room_mode() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(
            &room_id,
            "host",
            poll_input(PollType::PersonalityMode, &["Friendly", "Chaotic energy"], 60),
        )
        .await
        .unwrap();
    h.polls.cast_vote(&poll.id, "u1", "option_2").await.unwrap();
    h.polls.cast_vote(&poll.id, "u2", "option_2").await.unwrap();
    event_names(&mut events);

    let outcome = h.polls.close_poll(&poll.id, "host").await.unwrap();

    assert_eq!(outcome.winner.unwrap().text, "Chaotic energy");
    assert_eq!(event_names(&mut events), ["poll.closed", "room.modeChanged"]);
    let room = h.registry.get_room(&room_id).await.unwrap();
    assert_eq!(room.current_mode, "chaotic");
}

#[tokio::test]
async fn test_personality_poll_without_votes_keeps_mode() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(
            &room_id,
            "host",
            poll_input(PollType::PersonalityMode, &["Friendly", "Serious"], 60),
        )
        .await
        .unwrap();
    event_names(&mut events);

    h.polls.expire_poll(&poll.id).await.unwrap().unwrap();

    assert_eq!(event_names(&mut events), ["poll.expired"]);
    let room = h.registry.get_room(&room_id).await.unwrap();
    assert_eq!(room.current_mode, "default");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_keep_one_active_poll_per_room() {
    let h = harness();
    let (first_room, _first_events) = room_with_listener(&h).await;
    let (second_room, _second_events) = room_with_listener(&h).await;

    let attempts = (0..8).map(|i| {
        let polls = h.polls.clone();
        let room_id = if i < 6 { first_room.clone() } else { second_room.clone() };
        tokio::spawn(async move {
            let created = polls
                .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 60))
                .await;
            (room_id, created)
        })
    });
    let outcomes: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for room_id in [&first_room, &second_room] {
        let created = outcomes
            .iter()
            .filter(|(id, r)| id == room_id && r.is_ok())
            .count();
        assert_eq!(created, 1, "room {room_id}");
    }
    assert!(
        outcomes
            .iter()
            .filter_map(|(_, r)| r.as_ref().err())
            .all(|e| matches!(e, AppError::Conflict(_)))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_votes_accept_exactly_one() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 60))
        .await
        .unwrap();

    let attempts = (0..16).map(|i| {
        let polls = h.polls.clone();
        let poll_id = poll.id.clone();
        let option = if i % 2 == 0 { "option_1" } else { "option_2" };
        tokio::spawn(async move { polls.cast_vote(&poll_id, "same-user", option).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::Conflict(_)))
    );
    let results = h.polls.get_poll_results(&poll.id).await.unwrap();
    assert_eq!(counts(&results).iter().sum::<u64>(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_converge() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;
    let poll = h
        .polls
        .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B", "C"], 60))
        .await
        .unwrap();

    let votes = (0..30).map(|i| {
        let polls = h.polls.clone();
        let poll_id = poll.id.clone();
        tokio::spawn(async move {
            let option = format!("option_{}", i % 3 + 1);
            polls.cast_vote(&poll_id, &format!("user-{i}"), &option).await
        })
    });
    for outcome in futures::future::join_all(votes).await {
        outcome.unwrap().unwrap();
    }

    let details = h.polls.get_poll(&poll.id).await.unwrap();
    assert_eq!(details.total_votes, 30);
    assert_eq!(counts(&details.results), [10, 10, 10]);
    // three-way tie goes to the first declared option
    assert!(details.results[0].is_winning);
}

#[tokio::test(start_paused = true)]
async fn test_recover_timers_after_restart() {
    let h = harness();
    let (room_id, mut events) = room_with_listener(&h).await;
    let now = h.clock.now();

    let stored = |id: &str, expires_in: i64| poll::Model {
        id: id.to_string(),
        room_id: room_id.clone(),
        creator_id: "host".to_string(),
        poll_type: PollType::Topic,
        question: "Recovered?".to_string(),
        options: PollOptions::from_texts(["yes", "no"]),
        duration_seconds: 60,
        status: PollStatus::Active,
        created_at: (now - Duration::seconds(60)).into(),
        expires_at: (now + Duration::seconds(expires_in)).into(),
        closed_at: None,
    };
    h.store.insert_poll(stored("overdue", -5)).await.unwrap();
    h.store.insert_poll(stored("pending", 20)).await.unwrap();

    assert_eq!(h.polls.recover_timers().await.unwrap(), 1);
    assert_eq!(event_names(&mut events), ["poll.expired"]);

    h.clock.advance(Duration::seconds(21));
    let event = tokio::time::timeout(StdDuration::from_secs(60), events.recv())
        .await
        .unwrap()
        .unwrap();
    let RoomEvent::PollExpired { poll, .. } = event.as_ref() else {
        panic!("unexpected event {}", event.name());
    };
    assert_eq!(poll.id, "pending");
}

#[tokio::test]
async fn test_poll_history_is_newest_first() {
    let h = harness();
    let (room_id, _events) = room_with_listener(&h).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let poll = h
            .polls
            .create_poll(&room_id, "host", poll_input(PollType::Topic, &["A", "B"], 30))
            .await
            .unwrap();
        h.polls.close_poll(&poll.id, "host").await.unwrap();
        h.clock.advance(Duration::seconds(1));
        ids.push(poll.id);
    }

    let history = h.polls.poll_history(&room_id, None).await.unwrap();
    assert_eq!(
        history.iter().map(|p| p.id.clone()).collect::<Vec<_>>(),
        [ids[1].clone(), ids[0].clone()]
    );
    assert!(matches!(
        h.polls.poll_history("missing", None).await,
        Err(AppError::NotFound(_))
    ));
}
