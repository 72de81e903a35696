//! Business logic services.

#![allow(missing_docs)]

pub mod dispatcher;
pub mod expiration;
pub mod memory_store;
pub mod mode;
pub mod poll;
pub mod room;
pub mod session;
pub mod store;

pub use dispatcher::{BroadcastDispatcher, DEFAULT_ROOM_CHANNEL_CAPACITY, RoomEvent};
pub use expiration::ExpirationScheduler;
pub use memory_store::MemoryRoomStore;
pub use mode::{known_modes, resolve_mode};
pub use poll::{
    CreatePollInput, OptionResult, PollDetails, PollLimits, PollOutcome, PollService,
    compute_results,
};
pub use room::{
    ConnectionHandle, CreateRoomInput, JoinedRoom, Leaderboard, LeaderboardEntry, LeftRoom,
    RoomRegistry, RoomSnapshot,
};
pub use session::{Claims, JwtSessionVerifier, SessionUser, SessionVerifier, SessionVerifierService};
pub use store::{ActivityCounts, DatabaseRoomStore, RoomStore, RoomStoreService};
