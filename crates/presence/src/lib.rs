//! Courier Presence Crate
//!
//! Tracks which users hold live connections and derives online state from
//! the connection count alone: a user is online exactly as long as at least
//! one connection is open, with no grace period.

pub mod registry;

pub use registry::{ConnectionId, ConnectionRegistry, PresenceChange};
