//! Entity definitions for the message store

pub mod message;

pub use message::{conversation_id, ContentType, PrivateMessage, RecentContact};
