//! Maintenance jobs over rooms and polls.

use std::error::Error;

use lounge_core::{PollService, RoomRegistry};

use crate::scheduler::JobExecutor;

/// [`JobExecutor`] backed by the poll engine and the room registry.
#[derive(Clone)]
pub struct RoomMaintenance {
    polls: PollService,
    rooms: RoomRegistry,
}

impl RoomMaintenance {
    #[must_use]
    pub const fn new(polls: PollService, rooms: RoomRegistry) -> Self {
        Self { polls, rooms }
    }
}

#[async_trait::async_trait]
impl JobExecutor for RoomMaintenance {
    async fn sweep_expired_polls(&self) -> Result<u64, Box<dyn Error + Send + Sync>> {
        Ok(self.polls.sweep_expired().await?)
    }

    async fn reap_stale_presence(&self) -> Result<u64, Box<dyn Error + Send + Sync>> {
        Ok(self.rooms.reap_stale_presence().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use lounge_common::ManualClock;
    use lounge_core::{
        BroadcastDispatcher, ConnectionHandle, CreatePollInput, CreateRoomInput,
        ExpirationScheduler, MemoryRoomStore, RoomStore,
    };
    use lounge_db::entities::poll::{PollStatus, PollType};

    #[tokio::test]
    async fn test_maintenance_runs_sweep_and_reaper() {
        let store = Arc::new(MemoryRoomStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = BroadcastDispatcher::default();
        let rooms = RoomRegistry::new(store.clone(), dispatcher.clone(), clock.clone());
        let (scheduler, _fired) = ExpirationScheduler::new();
        let polls = PollService::new(
            store.clone(),
            rooms.clone(),
            dispatcher,
            scheduler,
            clock.clone(),
        );
        let maintenance = RoomMaintenance::new(polls.clone(), rooms.clone());

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
        let conn = ConnectionHandle::new();
        rooms.join_room(&room.id, "host", "Host", &conn).await.unwrap();
        let poll = polls
            .create_poll(
                &room.id,
                "host",
                CreatePollInput {
                    poll_type: PollType::Topic,
                    question: "Snacks?".to_string(),
                    options: vec!["Chips".to_string(), "Fruit".to_string()],
                    duration_seconds: 30,
                },
            )
            .await
            .unwrap();

        assert_eq!(maintenance.sweep_expired_polls().await.unwrap(), 0);
        clock.advance(Duration::seconds(31));
        assert_eq!(maintenance.sweep_expired_polls().await.unwrap(), 1);
        let stored = store.find_poll(&poll.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PollStatus::Expired);

        assert_eq!(maintenance.reap_stale_presence().await.unwrap(), 0);
    }
}
