//! Repository implementations for the message store

pub mod message_repository;

pub use message_repository::MessageRepository;
