//! Test utilities and helpers for peerbus
//!
//! A recording [`Host`](crate::core_host::Host), managers wired to an
//! in-memory mesh with simulated time, and small helpers for driving several
//! managers until their queues settle.

pub mod fixtures;
pub mod host;

pub use fixtures::*;
pub use host::RecordingHost;
