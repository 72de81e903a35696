//! Database entities.

#![allow(missing_docs)]

pub mod poll;
pub mod poll_vote;
pub mod room;
pub mod room_message;
pub mod room_participant;

pub use poll::Entity as Poll;
pub use poll_vote::Entity as PollVote;
pub use room::Entity as Room;
pub use room_message::Entity as RoomMessage;
pub use room_participant::Entity as RoomParticipant;
