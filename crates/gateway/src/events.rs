//! Wire events exchanged with connected clients.
//!
//! Events are internally tagged JSON: `{"type": "...", "data": {...}}`.
//! Payload field names follow the client protocol (camelCase, `from`/`to`
//! for the participants).

use courier_database::{ContentType, PrivateMessage};
use serde::{Deserialize, Serialize};

/// Events a client may send over its connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    /// Announce identity and enter the presence set.
    #[serde(rename = "join")]
    Join { username: String },

    /// Send a direct message.
    #[serde(rename = "send", rename_all = "camelCase")]
    Send {
        to: String,
        from: String,
        content: String,
        #[serde(rename = "type", default)]
        content_type: ContentType,
        #[serde(default)]
        file_name: Option<String>,
    },

    /// Edit a previously sent message. Sender-only.
    #[serde(rename = "edit", rename_all = "camelCase")]
    Edit {
        message_id: String,
        new_content: String,
    },

    /// Delete a previously sent message. Sender-only.
    #[serde(rename = "delete", rename_all = "camelCase")]
    Delete { message_id: String },

    /// Typing indicator, relayed verbatim without persistence.
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { is_typing: bool },

    /// Acknowledge having read the conversation with a peer.
    #[serde(rename = "read")]
    Read { with: String },

    /// Request recent conversation history with a peer.
    #[serde(rename = "history")]
    History {
        with: String,
        #[serde(default)]
        limit: Option<i64>,
    },

    /// Request the contact list seeded from past conversations.
    #[serde(rename = "contacts")]
    Contacts,
}

/// Events the server emits to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Full snapshot of online identities, sent on every presence change.
    #[serde(rename = "online-list")]
    OnlineList(Vec<String>),

    #[serde(rename = "joined")]
    Joined {
        username: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "left")]
    Left {
        username: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Acknowledgement to the sender carrying the authoritative record.
    #[serde(rename = "message:sent")]
    MessageSent(PrivateMessage),

    /// Delivery to the recipient, live or replayed on reconnect.
    #[serde(rename = "message:received")]
    MessageReceived(PrivateMessage),

    #[serde(rename = "message:edited", rename_all = "camelCase")]
    MessageEdited {
        message_id: String,
        new_content: String,
        edited_at: String,
    },

    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted { message_id: String },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { username: String, is_typing: bool },

    #[serde(rename = "read")]
    Read { with: String, updated: u64 },

    #[serde(rename = "history")]
    History {
        with: String,
        messages: Vec<PrivateMessage>,
    },

    #[serde(rename = "contacts")]
    Contacts(Vec<ContactSummary>),

    #[serde(rename = "error")]
    Error { message: String },
}

/// One conversation partner with last activity and pending unread count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub peer: String,
    pub last_message_at: String,
    pub last_content: String,
    pub unread_count: i64,
}
