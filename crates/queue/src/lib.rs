//! Background maintenance for lounge.
//!
//! - **Scheduler**: periodic tasks driven by a [`JobExecutor`]
//! - **Maintenance**: the poll reconciliation sweep and the stale presence
//!   reaper

pub mod maintenance;
pub mod scheduler;

pub use maintenance::RoomMaintenance;
pub use scheduler::{JobExecutor, ScheduledJob, SchedulerConfig, run_scheduler};
