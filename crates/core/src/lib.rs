//! Room sessions, polls and their real-time fan-out.

pub mod services;

pub use services::*;
