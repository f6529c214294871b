//! Shared application state for the gateway

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use courier_config::ChannelConfig;
use courier_database::MessageRepository;
use courier_presence::ConnectionRegistry;

use crate::auth::{IdentityVerifier, TrustedHeaderVerifier};
use crate::events::ServerEvent;
use crate::filter::{ContentFilter, PassthroughFilter};

#[derive(Clone)]
pub struct AppState {
    messages: MessageRepository,
    registry: ConnectionRegistry<ServerEvent>,
    verifier: Arc<dyn IdentityVerifier>,
    filter: Arc<dyn ContentFilter>,
    channel: ChannelConfig,
    replay_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    pub fn new(pool: SqlitePool, channel: ChannelConfig) -> Self {
        Self::with_hooks(
            pool,
            channel,
            Arc::new(TrustedHeaderVerifier),
            Arc::new(PassthroughFilter),
        )
    }

    /// Build state with explicit collaborator hooks.
    pub fn with_hooks(
        pool: SqlitePool,
        channel: ChannelConfig,
        verifier: Arc<dyn IdentityVerifier>,
        filter: Arc<dyn ContentFilter>,
    ) -> Self {
        Self {
            messages: MessageRepository::new(pool),
            registry: ConnectionRegistry::new(),
            verifier,
            filter,
            channel,
            replay_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    pub fn registry(&self) -> &ConnectionRegistry<ServerEvent> {
        &self.registry
    }

    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.verifier.as_ref()
    }

    pub fn filter(&self) -> &dyn ContentFilter {
        self.filter.as_ref()
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// Per-user lock serialising reconnect replay, so a second connection of
    /// the same user cannot mark messages read while the first is replaying.
    pub async fn replay_lock(&self, username: &str) -> Arc<Mutex<()>> {
        let mut locks = self.replay_locks.lock().await;
        locks.entry(username.to_string()).or_default().clone()
    }
}
