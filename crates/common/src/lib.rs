//! Common utilities and shared types for lounge.
//!
//! This crate provides foundational components used across all lounge crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID identifiers and public room codes via [`IdGenerator`]
//! - **Clock**: Injectable time source via [`Clock`]
//!
//! # Example
//!
//! ```no_run
//! use lounge_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let code = id_gen.generate_room_code();
//!     println!("Listening on port {}, sample room code {}", config.server.port, code);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod id;

pub use clock::{Clock, ClockService, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
