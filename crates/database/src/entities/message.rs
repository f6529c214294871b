//! Direct message entity definitions

use serde::{Deserialize, Serialize};

/// A persisted direct message between two users.
///
/// Sender, recipient and conversation id are fixed at creation; content and
/// the edited fields change only through the repository's ownership-checked
/// edit operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    /// Store-internal rowid; orders messages with equal timestamps.
    #[serde(skip_serializing, default)]
    pub id: i64,
    /// Stable identifier handed to clients.
    #[serde(rename = "_id")]
    pub public_id: String,
    pub conversation_id: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub recipient: String,
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub is_read: bool,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    #[serde(rename = "timestamp")]
    pub created_at: String,
}

/// One conversation partner with the time of last activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentContact {
    pub peer: String,
    pub last_message_at: String,
    pub last_content: String,
}

/// Closed set of message content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    File,
    Audio,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::File => "file",
            ContentType::Audio => "audio",
        }
    }
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Text
    }
}

impl From<&str> for ContentType {
    fn from(s: &str) -> Self {
        match s {
            "image" => ContentType::Image,
            "file" => ContentType::File,
            "audio" => ContentType::Audio,
            _ => ContentType::Text,
        }
    }
}

/// Deterministic key for the conversation between two users.
///
/// The pair is sorted before joining, so both participants derive the same
/// identifier no matter who initiated.
pub fn conversation_id(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort_unstable();
    pair.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        assert_eq!(conversation_id("alice", "bob"), conversation_id("bob", "alice"));
        assert_eq!(conversation_id("alice", "bob"), "alice_bob");
    }

    #[test]
    fn conversation_id_of_equal_parties_is_stable() {
        assert_eq!(conversation_id("carol", "carol"), "carol_carol");
    }

    #[test]
    fn content_type_round_trips_as_str() {
        for ct in [
            ContentType::Text,
            ContentType::Image,
            ContentType::File,
            ContentType::Audio,
        ] {
            assert_eq!(ContentType::from(ct.as_str()), ct);
        }
        assert_eq!(ContentType::from("unknown"), ContentType::Text);
    }
}
