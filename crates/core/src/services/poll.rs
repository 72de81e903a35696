//! Poll engine.
//!
//! A poll moves `active -> closed` (creator) or `active -> expired` (timer or
//! sweep). Both transitions go through the store's guarded update, so only one
//! of them can ever win and it is announced exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lounge_common::{AppError, AppResult, ClockService, IdGenerator};
use lounge_db::entities::poll::{self, PollOptions, PollStatus, PollType};
use lounge_db::entities::poll_vote;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use validator::Validate;

use super::dispatcher::{BroadcastDispatcher, RoomEvent};
use super::expiration::ExpirationScheduler;
use super::mode::resolve_mode;
use super::room::RoomRegistry;
use super::store::RoomStoreService;

const MAX_OPTION_LEN: usize = 100;
const MAX_HISTORY_PAGE: u64 = 50;

/// Input for creating a poll.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollInput {
    pub poll_type: PollType,
    #[validate(length(min = 1, max = 300))]
    pub question: String,
    #[validate(length(min = 2, max = 6))]
    pub options: Vec<String>,
    #[validate(range(min = 30, max = 600))]
    pub duration_seconds: i32,
}

/// Creation rate limit, per room.
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    pub max_polls_per_window: u64,
    pub window: chrono::Duration,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            max_polls_per_window: 3,
            window: chrono::Duration::seconds(60),
        }
    }
}

/// Tally of one option.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub option_id: String,
    pub text: String,
    pub vote_count: u64,
    /// Share of all votes, 0 to 100. Zero when nobody voted.
    pub percentage: f64,
    pub is_winning: bool,
}

/// A poll with its current results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDetails {
    pub poll: poll::Model,
    pub results: Vec<OptionResult>,
    pub total_votes: u64,
}

/// Final state of a poll that just closed or expired.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    pub poll: poll::Model,
    pub results: Vec<OptionResult>,
    pub winner: Option<OptionResult>,
}

/// Tally options in declaration order.
///
/// The winner is the option with the most votes; ties go to the option
/// declared first. Without any vote there is no winner.
#[must_use]
pub fn compute_results(options: &PollOptions, tally: &HashMap<String, u64>) -> Vec<OptionResult> {
    let counts: Vec<u64> = options
        .iter()
        .map(|option| tally.get(&option.id).copied().unwrap_or(0))
        .collect();
    let total: u64 = counts.iter().sum();

    let mut winner = None;
    let mut best = 0;
    for (index, &count) in counts.iter().enumerate() {
        if count > best {
            best = count;
            winner = Some(index);
        }
    }

    options
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(index, (option, vote_count))| OptionResult {
            option_id: option.id.clone(),
            text: option.text.clone(),
            vote_count,
            percentage: percentage(vote_count, total),
            is_winning: winner == Some(index),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Poll service for business logic.
#[derive(Clone)]
pub struct PollService {
    store: RoomStoreService,
    registry: RoomRegistry,
    dispatcher: BroadcastDispatcher,
    scheduler: ExpirationScheduler,
    clock: ClockService,
    id_gen: IdGenerator,
    limits: PollLimits,
    room_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PollService {
    /// Create a new poll service.
    #[must_use]
    pub fn new(
        store: RoomStoreService,
        registry: RoomRegistry,
        dispatcher: BroadcastDispatcher,
        scheduler: ExpirationScheduler,
        clock: ClockService,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            scheduler,
            clock,
            id_gen: IdGenerator::new(),
            limits: PollLimits::default(),
            room_locks: Arc::default(),
        }
    }

    /// Override the creation rate limit.
    #[must_use]
    pub const fn with_limits(mut self, limits: PollLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn lock_room(&self, room_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.room_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(room_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Create a poll in a room and arm its timer.
    pub async fn create_poll(
        &self,
        room_id: &str,
        creator_id: &str,
        input: CreatePollInput,
    ) -> AppResult<poll::Model> {
        let (question, options) = validate_poll_input(&input)?;

        self.store
            .find_room(room_id)
            .await?
            .filter(|room| room.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))?;

        // Serializes the window count and the single-active-poll check.
        let _creating = self.lock_room(room_id).await;

        let now = self.clock.now();
        let recent = self
            .store
            .count_polls_since(room_id, now - self.limits.window)
            .await?;
        if recent >= self.limits.max_polls_per_window {
            tracing::debug!(room_id = %room_id, recent, "Poll creation rate limited");
            return Err(AppError::RateLimited(format!(
                "At most {} polls per {} seconds",
                self.limits.max_polls_per_window,
                self.limits.window.num_seconds()
            )));
        }

        while let Some(active) = self.store.find_active_poll(room_id).await? {
            if active.is_open_at(now.into()) {
                return Err(AppError::Conflict(
                    "Room already has an active poll".to_string(),
                ));
            }
            self.expire_poll(&active.id).await?;
        }

        let poll = self
            .store
            .insert_poll(poll::Model {
                id: self.id_gen.generate(),
                room_id: room_id.to_string(),
                creator_id: creator_id.to_string(),
                poll_type: input.poll_type,
                question,
                options: PollOptions::from_texts(options),
                duration_seconds: input.duration_seconds,
                status: PollStatus::Active,
                created_at: now.into(),
                expires_at: (now + chrono::Duration::seconds(i64::from(input.duration_seconds)))
                    .into(),
                closed_at: None,
            })
            .await?;

        self.scheduler
            .schedule(
                &poll.id,
                Duration::from_secs(input.duration_seconds.unsigned_abs().into()),
            )
            .await;

        let results = compute_results(&poll.options, &HashMap::new());
        self.dispatcher
            .publish(
                room_id,
                RoomEvent::PollCreated {
                    poll: poll.clone(),
                    results,
                },
            )
            .await;

        tracing::info!(
            poll_id = %poll.id,
            room_id = %room_id,
            creator_id = %creator_id,
            options = poll.options.len(),
            duration_seconds = poll.duration_seconds,
            "Created poll"
        );
        Ok(poll)
    }

    /// Cast a vote and return the updated results.
    pub async fn cast_vote(
        &self,
        poll_id: &str,
        user_id: &str,
        option_id: &str,
    ) -> AppResult<Vec<OptionResult>> {
        let poll = self.get_poll_model(poll_id).await?;
        let now = self.clock.now();

        if !poll.is_open_at(now.into()) {
            return Err(AppError::Conflict("Poll is no longer active".to_string()));
        }
        if poll.options.get(option_id).is_none() {
            return Err(AppError::Validation(format!("Unknown option {option_id}")));
        }

        self.store
            .insert_vote(
                poll_vote::Model {
                    id: self.id_gen.generate(),
                    poll_id: poll_id.to_string(),
                    user_id: user_id.to_string(),
                    option_id: option_id.to_string(),
                    created_at: now.into(),
                },
                now,
            )
            .await?;

        let results = self.results_for(&poll).await?;
        self.dispatcher
            .publish(
                &poll.room_id,
                RoomEvent::ResultsUpdate {
                    poll_id: poll_id.to_string(),
                    results: results.clone(),
                },
            )
            .await;

        tracing::debug!(poll_id = %poll_id, user_id = %user_id, option_id = %option_id, "Vote accepted");
        Ok(results)
    }

    /// Current results of a poll.
    pub async fn get_poll_results(&self, poll_id: &str) -> AppResult<Vec<OptionResult>> {
        let poll = self.get_poll_model(poll_id).await?;
        self.results_for(&poll).await
    }

    /// A poll with its results.
    pub async fn get_poll(&self, poll_id: &str) -> AppResult<PollDetails> {
        let poll = self.get_poll_model(poll_id).await?;
        self.details(poll).await
    }

    /// The open poll of a room, if any.
    pub async fn get_active_poll(&self, room_id: &str) -> AppResult<Option<PollDetails>> {
        let now = self.clock.now();
        match self.store.find_active_poll(room_id).await? {
            Some(poll) if poll.is_open_at(now.into()) => Ok(Some(self.details(poll).await?)),
            _ => Ok(None),
        }
    }

    /// Polls of a room, newest first.
    pub async fn poll_history(
        &self,
        room_id: &str,
        limit: Option<u64>,
    ) -> AppResult<Vec<poll::Model>> {
        self.store
            .find_room(room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id}")))?;
        let limit = limit.unwrap_or(20).clamp(1, MAX_HISTORY_PAGE);
        self.store.list_polls(room_id, limit).await
    }

    /// Close a poll before its deadline. Creator only.
    pub async fn close_poll(&self, poll_id: &str, user_id: &str) -> AppResult<PollOutcome> {
        let poll = self.get_poll_model(poll_id).await?;
        if poll.creator_id != user_id {
            return Err(AppError::Forbidden(
                "Only the creator can close this poll".to_string(),
            ));
        }
        if poll.status != PollStatus::Active {
            return Err(AppError::Conflict("Poll is no longer active".to_string()));
        }

        self.finalize(poll_id, PollStatus::Closed)
            .await?
            .ok_or_else(|| AppError::Conflict("Poll is no longer active".to_string()))
    }

    /// Expire a poll. `None` when it was already closed or expired.
    pub async fn expire_poll(&self, poll_id: &str) -> AppResult<Option<PollOutcome>> {
        self.finalize(poll_id, PollStatus::Expired).await
    }

    /// Expire every active poll past its deadline. Returns how many this
    /// call expired.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let overdue = self.store.list_overdue_polls(self.clock.now()).await?;
        let mut expired = 0;
        for poll in overdue {
            if self.expire_poll(&poll.id).await?.is_some() {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Re-arm timers of active polls after a restart. Overdue polls are
    /// expired right away. Returns the number of timers armed.
    pub async fn recover_timers(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let mut armed = 0;
        for poll in self.store.list_active_polls().await? {
            match (poll.expires_at.with_timezone(&Utc) - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => {
                    self.scheduler.schedule(&poll.id, remaining).await;
                    armed += 1;
                }
                _ => {
                    self.expire_poll(&poll.id).await?;
                }
            }
        }
        if armed > 0 {
            tracing::info!(armed, "Recovered poll timers");
        }
        Ok(armed)
    }

    /// Consume fired timers until the scheduler goes away.
    #[must_use]
    pub fn spawn_expiration_worker(&self, mut fired: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(poll_id) = fired.recv().await {
                match service.expire_poll(&poll_id).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tracing::debug!(poll_id = %poll_id, "Timer fired for finished poll");
                    }
                    Err(e) => {
                        tracing::error!(poll_id = %poll_id, error = %e, "Failed to expire poll");
                    }
                }
            }
        })
    }

    async fn get_poll_model(&self, poll_id: &str) -> AppResult<poll::Model> {
        self.store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))
    }

    async fn results_for(&self, poll: &poll::Model) -> AppResult<Vec<OptionResult>> {
        let tally = self.store.tally_votes(&poll.id).await?;
        Ok(compute_results(&poll.options, &tally))
    }

    async fn details(&self, poll: poll::Model) -> AppResult<PollDetails> {
        let results = self.results_for(&poll).await?;
        Ok(PollDetails {
            total_votes: results.iter().map(|r| r.vote_count).sum(),
            poll,
            results,
        })
    }

    async fn finalize(&self, poll_id: &str, status: PollStatus) -> AppResult<Option<PollOutcome>> {
        let Some(poll) = self
            .store
            .finish_poll(poll_id, status, self.clock.now())
            .await?
        else {
            return Ok(None);
        };
        self.scheduler.cancel(poll_id).await;

        let results = self.results_for(&poll).await?;
        let outcome = PollOutcome {
            winner: results.iter().find(|r| r.is_winning).cloned(),
            poll,
            results,
        };

        let event = if status == PollStatus::Closed {
            RoomEvent::PollClosed {
                poll: outcome.poll.clone(),
                results: outcome.results.clone(),
            }
        } else {
            RoomEvent::PollExpired {
                poll: outcome.poll.clone(),
                results: outcome.results.clone(),
            }
        };
        self.dispatcher.publish(&outcome.poll.room_id, event).await;

        tracing::info!(
            poll_id = %poll_id,
            room_id = %outcome.poll.room_id,
            status = ?status,
            winner = outcome.winner.as_ref().map(|w| w.option_id.as_str()),
            "Poll finished"
        );

        if outcome.poll.poll_type == PollType::PersonalityMode {
            if let Some(winner) = &outcome.winner {
                let mode = resolve_mode(&winner.text);
                if let Err(e) = self
                    .registry
                    .apply_mode(&outcome.poll.room_id, mode, "poll")
                    .await
                {
                    tracing::warn!(
                        room_id = %outcome.poll.room_id,
                        error = %e,
                        "Failed to apply poll mode"
                    );
                }
            }
        }

        Ok(Some(outcome))
    }
}

fn validate_poll_input(input: &CreatePollInput) -> AppResult<(String, Vec<String>)> {
    input.validate()?;

    let question = input.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation(
            "Poll question cannot be empty".to_string(),
        ));
    }

    let options: Vec<String> = input
        .options
        .iter()
        .map(|option| option.trim().to_string())
        .collect();
    for option in &options {
        if option.is_empty() {
            return Err(AppError::Validation(
                "Poll options cannot be empty".to_string(),
            ));
        }
        if option.chars().count() > MAX_OPTION_LEN {
            return Err(AppError::Validation(format!(
                "Poll option is too long (max {MAX_OPTION_LEN} chars)"
            )));
        }
    }

    Ok((question.to_string(), options))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn options(n: usize) -> PollOptions {
        PollOptions::from_texts((0..n).map(|i| format!("choice {i}")))
    }

    fn tally(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn input(options: &[&str], duration_seconds: i32) -> CreatePollInput {
        CreatePollInput {
            poll_type: PollType::Custom,
            question: "What next?".to_string(),
            options: options.iter().map(|o| (*o).to_string()).collect(),
            duration_seconds,
        }
    }

    #[test]
    fn test_results_no_votes_has_no_winner() {
        let results = compute_results(&options(3), &HashMap::new());

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.vote_count == 0));
        assert!(results.iter().all(|r| r.percentage == 0.0));
        assert!(results.iter().all(|r| !r.is_winning));
    }

    #[test]
    fn test_results_percentages() {
        let results = compute_results(&options(3), &tally(&[("option_1", 3), ("option_3", 1)]));

        assert_eq!(results[0].percentage, 75.0);
        assert_eq!(results[1].percentage, 0.0);
        assert_eq!(results[2].percentage, 25.0);
        assert!(results[0].is_winning);
    }

    #[test]
    fn test_results_tie_goes_to_first_declared() {
        let results = compute_results(&options(3), &tally(&[("option_2", 2), ("option_3", 2)]));

        assert!(!results[0].is_winning);
        assert!(results[1].is_winning);
        assert!(!results[2].is_winning);
    }

    #[test]
    fn test_results_ignore_unknown_options() {
        let results = compute_results(&options(2), &tally(&[("option_9", 5), ("option_2", 1)]));

        assert_eq!(results.iter().map(|r| r.vote_count).sum::<u64>(), 1);
        assert_eq!(results[1].percentage, 100.0);
    }

    #[test]
    fn test_validate_poll_input_bounds() {
        assert!(validate_poll_input(&input(&["a", "b"], 30)).is_ok());
        assert!(validate_poll_input(&input(&["a", "b", "c", "d", "e", "f"], 600)).is_ok());

        for bad in [
            input(&["a"], 60),
            input(&["a", "b", "c", "d", "e", "f", "g"], 60),
            input(&["a", "b"], 29),
            input(&["a", "b"], 601),
            input(&["a", "  "], 60),
            input(&["a", &"x".repeat(101)], 60),
        ] {
            assert!(
                matches!(validate_poll_input(&bad), Err(AppError::Validation(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_validate_poll_input_trims() {
        let mut raw = input(&["  yes ", "no"], 60);
        raw.question = "  Pizza?  ".to_string();

        let (question, options) = validate_poll_input(&raw).unwrap();
        assert_eq!(question, "Pizza?");
        assert_eq!(options, ["yes", "no"]);

        raw.question = "   ".to_string();
        assert!(validate_poll_input(&raw).is_err());
    }

    async fn service_with_rooms(count: usize) -> (PollService, Vec<String>) {
        use crate::{CreateRoomInput, MemoryRoomStore};
        use lounge_common::SystemClock;

        let store = Arc::new(MemoryRoomStore::new());
        let clock = Arc::new(SystemClock);
        let dispatcher = BroadcastDispatcher::default();
        let registry = RoomRegistry::new(store.clone(), dispatcher.clone(), clock.clone());
        let (scheduler, _fired) = ExpirationScheduler::new();

        let mut rooms = Vec::new();
        for _ in 0..count {
            let room = registry
                .create_room(
                    "host",
                    CreateRoomInput {
                        name: None,
                        max_participants: 4,
                    },
                )
                .await
                .unwrap();
            rooms.push(room.id);
        }
        let service = PollService::new(store, registry, dispatcher, scheduler, clock);
        (service, rooms)
    }

    #[tokio::test]
    async fn test_create_lock_is_per_room() {
        let (service, rooms) = service_with_rooms(2).await;
        let wait = Duration::from_millis(200);

        let held = service.lock_room(&rooms[0]).await;

        let other = tokio::time::timeout(
            wait,
            service.create_poll(&rooms[1], "host", input(&["a", "b"], 60)),
        )
        .await;
        assert!(matches!(other, Ok(Ok(_))));

        let same = tokio::time::timeout(
            wait,
            service.create_poll(&rooms[0], "host", input(&["a", "b"], 60)),
        )
        .await;
        assert!(same.is_err());

        drop(held);
        assert!(service.create_poll(&rooms[0], "host", input(&["a", "b"], 60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_room_locks_are_pruned() {
        let (service, rooms) = service_with_rooms(3).await;

        for room_id in &rooms {
            service.create_poll(room_id, "host", input(&["a", "b"], 60)).await.unwrap();
        }

        let _held = service.lock_room(&rooms[0]).await;
        assert_eq!(service.room_locks.lock().await.len(), 1);
    }

    #[test]
    fn test_create_input_deserializes_camel_case() {
        let raw: CreatePollInput = serde_json::from_value(serde_json::json!({
            "pollType": "personality_mode",
            "question": "Mood?",
            "options": ["Friendly", "Chaotic"],
            "durationSeconds": 45
        }))
        .unwrap();

        assert_eq!(raw.poll_type, PollType::PersonalityMode);
        assert_eq!(raw.duration_seconds, 45);
    }
}
