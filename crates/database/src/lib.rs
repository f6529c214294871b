//! Courier Database Crate
//!
//! Durable persistence for direct messages: connection management, schema
//! migrations, and the message repository that the delivery layer builds on.

use sqlx::SqlitePool;

use courier_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::prepare_database;
pub use migrations::run_migrations;

pub use entities::message::{conversation_id, ContentType, PrivateMessage, RecentContact};
pub use repos::MessageRepository;
pub use types::{errors::StoreError, StoreResult};

/// Initialize the database pool and apply migrations.
pub async fn initialize_database(config: &DatabaseConfig) -> StoreResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(pool)
}
