//! Test support for the OneOff workspace.
//!
//! Hermetic in-memory store environments, a deterministic clock, scripted
//! executors, and an event recorder. Everything here is test-only plumbing;
//! no production crate depends on it.

#![forbid(unsafe_code)]

pub mod env;
pub mod events;
pub mod executors;
pub mod time;

pub use env::TestEnv;
pub use events::RecordingEventHandler;
pub use executors::{register_test_executors, SleepExecutor, StaticExecutor};
pub use time::TestClock;
