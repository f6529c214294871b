//! Repository for direct message persistence.
//!
//! All mutation of a message goes through this repository; the delivery layer
//! never caches a mutable copy. Per-conversation order is append order:
//! `created_at` ascending, ties broken by the autoincrement rowid.

use crate::entities::message::{conversation_id, ContentType, PrivateMessage, RecentContact};
use crate::types::{StoreError, StoreResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

const DEFAULT_CONVERSATION_LIMIT: i64 = 50;

const MESSAGE_COLUMNS: &str = "id, public_id, conversation_id, sender, recipient, content, \
     content_type, file_name, is_read, edited, edited_at, created_at";

/// Repository for message database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new message and return the full record.
    ///
    /// Sender, recipient and content must be non-empty after trimming;
    /// nothing is written otherwise.
    pub async fn append(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        content_type: ContentType,
        file_name: Option<&str>,
    ) -> StoreResult<PrivateMessage> {
        let sender = sender.trim();
        let recipient = recipient.trim();
        let content = content.trim();

        if sender.is_empty() {
            return Err(StoreError::Validation("sender is required".to_string()));
        }
        if recipient.is_empty() {
            return Err(StoreError::Validation("recipient is required".to_string()));
        }
        if content.is_empty() {
            return Err(StoreError::Validation("content is required".to_string()));
        }

        let public_id = cuid2::create_id();
        let conversation = conversation_id(sender, recipient);
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO private_messages \
                 (public_id, conversation_id, sender, recipient, content, content_type, \
                  file_name, is_read, edited, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)",
        )
        .bind(&public_id)
        .bind(&conversation)
        .bind(sender)
        .bind(recipient)
        .bind(content)
        .bind(content_type.as_str())
        .bind(file_name)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!(
            public_id = %public_id,
            conversation_id = %conversation,
            sender = sender,
            recipient = recipient,
            "persisted message"
        );

        Ok(PrivateMessage {
            id: result.last_insert_rowid(),
            public_id,
            conversation_id: conversation,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            content: content.to_string(),
            content_type,
            file_name: file_name.map(str::to_string),
            is_read: false,
            edited: false,
            edited_at: None,
            created_at: now,
        })
    }

    /// Find a message by its public ID
    pub async fn find_by_public_id(&self, public_id: &str) -> StoreResult<Option<PrivateMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM private_messages WHERE public_id = ?"
        ))
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    /// Replace a message's content. Only the original sender may edit.
    pub async fn edit(
        &self,
        public_id: &str,
        requester: &str,
        new_content: &str,
    ) -> StoreResult<PrivateMessage> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(StoreError::Validation("content is required".to_string()));
        }

        let mut message = self
            .find_by_public_id(public_id)
            .await?
            .ok_or(StoreError::MessageNotFound)?;

        if message.sender != requester {
            return Err(StoreError::PermissionDenied);
        }

        let edited_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE private_messages SET content = ?, edited = 1, edited_at = ? WHERE public_id = ?",
        )
        .bind(new_content)
        .bind(&edited_at)
        .bind(public_id)
        .execute(&self.pool)
        .await?;

        info!(public_id = public_id, edited_by = requester, "edited message");

        message.content = new_content.to_string();
        message.edited = true;
        message.edited_at = Some(edited_at);
        Ok(message)
    }

    /// Remove a message permanently. Only the original sender may delete.
    ///
    /// Returns the removed record so callers can resolve the recipient for
    /// fan-out without a second lookup.
    pub async fn delete(&self, public_id: &str, requester: &str) -> StoreResult<PrivateMessage> {
        let message = self
            .find_by_public_id(public_id)
            .await?
            .ok_or(StoreError::MessageNotFound)?;

        if message.sender != requester {
            return Err(StoreError::PermissionDenied);
        }

        sqlx::query("DELETE FROM private_messages WHERE public_id = ?")
            .bind(public_id)
            .execute(&self.pool)
            .await?;

        info!(public_id = public_id, deleted_by = requester, "deleted message");

        Ok(message)
    }

    /// Mark every unread message addressed to `recipient` in the conversation
    /// as read. Idempotent; returns the number of rows updated.
    pub async fn mark_read(&self, conversation: &str, recipient: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE private_messages SET is_read = 1 \
             WHERE conversation_id = ? AND recipient = ? AND is_read = 0",
        )
        .bind(conversation)
        .bind(recipient)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// The most recent `limit` messages of a conversation, oldest first.
    pub async fn conversation(
        &self,
        conversation: &str,
        limit: Option<i64>,
    ) -> StoreResult<Vec<PrivateMessage>> {
        let limit = limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT);

        let rows = sqlx::query(&format!(
            "SELECT * FROM ( \
                 SELECT {MESSAGE_COLUMNS} FROM private_messages \
                 WHERE conversation_id = ? \
                 ORDER BY created_at DESC, id DESC LIMIT ? \
             ) ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// All unread messages addressed to `user`, oldest first. Feeds reconnect
    /// replay only.
    pub async fn unread_for(&self, user: &str) -> StoreResult<Vec<PrivateMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM private_messages \
             WHERE recipient = ? AND is_read = 0 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// One entry per conversation partner, most recent activity first.
    pub async fn recent_contacts(&self, user: &str) -> StoreResult<Vec<RecentContact>> {
        // Bare columns beside MAX(id) resolve to the max row in SQLite.
        let rows = sqlx::query(
            "SELECT peer, content AS last_content, created_at AS last_message_at, MAX(id) \
             FROM ( \
                 SELECT CASE WHEN sender = ?1 THEN recipient ELSE sender END AS peer, \
                        content, created_at, id \
                 FROM private_messages \
                 WHERE sender = ?1 OR recipient = ?1 \
             ) \
             GROUP BY peer \
             ORDER BY last_message_at DESC",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RecentContact {
                    peer: row.try_get("peer")?,
                    last_message_at: row.try_get("last_message_at")?,
                    last_content: row.try_get("last_content")?,
                })
            })
            .collect()
    }

    /// Unread message counts per conversation for `user`.
    pub async fn unread_counts(&self, user: &str) -> StoreResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT conversation_id, COUNT(*) AS unread \
             FROM private_messages \
             WHERE recipient = ? AND is_read = 0 \
             GROUP BY conversation_id \
             ORDER BY unread DESC",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("conversation_id")?, row.try_get("unread")?)))
            .collect()
    }
}

fn row_to_message(row: &SqliteRow) -> StoreResult<PrivateMessage> {
    let content_type: String = row.try_get("content_type")?;

    Ok(PrivateMessage {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender: row.try_get("sender")?,
        recipient: row.try_get("recipient")?,
        content: row.try_get("content")?,
        content_type: ContentType::from(content_type.as_str()),
        file_name: row.try_get("file_name")?,
        is_read: row.try_get("is_read")?,
        edited: row.try_get("edited")?,
        edited_at: row.try_get("edited_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::prepare_database;
    use crate::migrations::run_migrations;
    use courier_config::DatabaseConfig;
    use tempfile::TempDir;

    async fn create_test_repo() -> (MessageRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_messages.db");

        let config = DatabaseConfig {
            url: format!("sqlite:{}", db_path.display()),
            max_connections: 1,
        };

        let pool = prepare_database(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();

        (MessageRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn append_assigns_id_and_conversation() {
        let (repo, _temp_dir) = create_test_repo().await;

        let message = repo
            .append("alice", "bob", "hello", ContentType::Text, None)
            .await
            .unwrap();

        assert!(message.id > 0);
        assert!(!message.public_id.is_empty());
        assert_eq!(message.conversation_id, "alice_bob");
        assert!(!message.is_read);
        assert!(!message.edited);
    }

    #[tokio::test]
    async fn append_rejects_missing_fields() {
        let (repo, _temp_dir) = create_test_repo().await;

        for (sender, recipient, content) in
            [("", "bob", "hi"), ("alice", "  ", "hi"), ("alice", "bob", "")]
        {
            let err = repo
                .append(sender, recipient, content, ContentType::Text, None)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }

        let all = repo.conversation("alice_bob", None).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn conversation_preserves_append_order() {
        let (repo, _temp_dir) = create_test_repo().await;

        for i in 0..5 {
            repo.append("alice", "bob", &format!("msg {i}"), ContentType::Text, None)
                .await
                .unwrap();
        }

        let id = conversation_id("bob", "alice");
        let messages = repo.conversation(&id, Some(5)).await.unwrap();

        assert_eq!(messages.len(), 5);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);

        let ids: std::collections::HashSet<_> =
            messages.iter().map(|m| m.public_id.clone()).collect();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn conversation_limit_keeps_most_recent() {
        let (repo, _temp_dir) = create_test_repo().await;

        for i in 0..4 {
            repo.append("alice", "bob", &format!("msg {i}"), ContentType::Text, None)
                .await
                .unwrap();
        }

        let messages = repo.conversation("alice_bob", Some(2)).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["msg 2", "msg 3"]);
    }

    #[tokio::test]
    async fn unread_flow_until_mark_read() {
        let (repo, _temp_dir) = create_test_repo().await;

        let message = repo
            .append("alice", "bob", "hi", ContentType::Text, None)
            .await
            .unwrap();

        let unread = repo.unread_for("bob").await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].public_id, message.public_id);

        // the sender has nothing unread
        assert!(repo.unread_for("alice").await.unwrap().is_empty());

        let updated = repo.mark_read(&message.conversation_id, "bob").await.unwrap();
        assert_eq!(updated, 1);
        assert!(repo.unread_for("bob").await.unwrap().is_empty());

        // idempotent
        let again = repo.mark_read(&message.conversation_id, "bob").await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn edit_requires_ownership() {
        let (repo, _temp_dir) = create_test_repo().await;

        let message = repo
            .append("alice", "bob", "original", ContentType::Text, None)
            .await
            .unwrap();

        let err = repo
            .edit(&message.public_id, "bob", "tampered")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied));

        // the stored record is untouched
        let stored = repo.conversation(&message.conversation_id, None).await.unwrap();
        assert_eq!(stored[0].content, "original");
        assert!(!stored[0].edited);

        let edited = repo
            .edit(&message.public_id, "alice", "updated")
            .await
            .unwrap();
        assert_eq!(edited.content, "updated");
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
    }

    #[tokio::test]
    async fn edit_missing_message_is_not_found() {
        let (repo, _temp_dir) = create_test_repo().await;

        let err = repo.edit("nope", "alice", "new").await.unwrap_err();
        assert!(matches!(err, StoreError::MessageNotFound));
    }

    #[tokio::test]
    async fn delete_requires_ownership_and_removes_row() {
        let (repo, _temp_dir) = create_test_repo().await;

        let message = repo
            .append("bob", "alice", "mine", ContentType::Text, None)
            .await
            .unwrap();

        let err = repo.delete(&message.public_id, "alice").await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied));
        assert_eq!(
            repo.conversation(&message.conversation_id, None).await.unwrap().len(),
            1
        );

        let removed = repo.delete(&message.public_id, "bob").await.unwrap();
        assert_eq!(removed.recipient, "alice");
        assert!(repo
            .find_by_public_id(&message.public_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn recent_contacts_orders_by_latest_activity() {
        let (repo, _temp_dir) = create_test_repo().await;

        repo.append("alice", "bob", "to bob", ContentType::Text, None)
            .await
            .unwrap();
        repo.append("carol", "alice", "from carol", ContentType::Text, None)
            .await
            .unwrap();
        repo.append("alice", "bob", "again", ContentType::Text, None)
            .await
            .unwrap();

        let contacts = repo.recent_contacts("alice").await.unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].peer, "bob");
        assert_eq!(contacts[0].last_content, "again");
        assert_eq!(contacts[1].peer, "carol");
    }

    #[tokio::test]
    async fn unread_counts_groups_by_conversation() {
        let (repo, _temp_dir) = create_test_repo().await;

        repo.append("bob", "alice", "one", ContentType::Text, None)
            .await
            .unwrap();
        repo.append("bob", "alice", "two", ContentType::Text, None)
            .await
            .unwrap();
        repo.append("carol", "alice", "three", ContentType::Text, None)
            .await
            .unwrap();

        let counts = repo.unread_counts("alice").await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0], (conversation_id("alice", "bob"), 2));
        assert_eq!(counts[1], (conversation_id("alice", "carol"), 1));
    }

    #[tokio::test]
    async fn file_message_keeps_file_name() {
        let (repo, _temp_dir) = create_test_repo().await;

        let message = repo
            .append("alice", "bob", "/uploads/report.pdf", ContentType::File, Some("report.pdf"))
            .await
            .unwrap();

        let stored = repo
            .find_by_public_id(&message.public_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content_type, ContentType::File);
        assert_eq!(stored.file_name.as_deref(), Some("report.pdf"));
    }
}
