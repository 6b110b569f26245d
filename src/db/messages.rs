//! Message log repository.
//!
//! Every chat message that passes the streaming engine is appended here:
//! public broadcasts, private messages and system notices. History reads
//! walk ids backwards (`ORDER BY id DESC LIMIT n`) and then reverse, so
//! callers always receive oldest-first pages.

use sqlx::SqlitePool;

use super::DbError;
use crate::permission::Permission;

/// A persisted chat message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub sender_name: String,
    pub text: String,
    pub permission: Permission,
    pub is_system: bool,
    pub is_private: bool,
    pub recipient_name: Option<String>,
    pub timestamp: i64,
}

/// Parameters for appending a message to the log.
#[derive(Debug, Clone)]
pub struct SaveMessageParams<'a> {
    pub sender_id: Option<i64>,
    pub sender_name: &'a str,
    pub text: &'a str,
    pub permission: Permission,
    pub is_system: bool,
    pub is_private: bool,
    pub recipient_id: Option<i64>,
    pub recipient_name: Option<&'a str>,
}

/// Repository for message log operations.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

type MessageRow = (
    i64,
    String,
    String,
    i64,
    bool,
    bool,
    Option<String>,
    i64,
);

const MESSAGE_COLUMNS: &str =
    "id, sender_name, content, permission, is_system, is_private, recipient_name, created_at";

fn row_to_message(row: MessageRow) -> StoredMessage {
    let (id, sender_name, text, permission, is_system, is_private, recipient_name, timestamp) = row;
    StoredMessage {
        id,
        sender_name,
        text,
        permission: Permission::from_rank(permission as i32).unwrap_or(Permission::User),
        is_system,
        is_private,
        recipient_name,
        timestamp,
    }
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message. Returns the new row id.
    pub async fn save(&self, params: SaveMessageParams<'_>) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages
                (sender_id, sender_name, content, permission, is_system, is_private,
                 recipient_id, recipient_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(params.sender_id)
        .bind(params.sender_name)
        .bind(params.text)
        .bind(params.permission.rank())
        .bind(params.is_system)
        .bind(params.is_private)
        .bind(params.recipient_id)
        .bind(params.recipient_name)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent public messages, oldest first. Private and deleted rows
    /// never appear. `before_id` pages further back in the log.
    pub async fn public_history(
        &self,
        limit: u32,
        before_id: Option<i64>,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let rows = match before_id {
            Some(before) => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE is_private = 0 AND is_deleted = 0 AND id < ?
                    ORDER BY id DESC LIMIT ?
                    "#
                ))
                .bind(before)
                .bind(limit as i64)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE is_private = 0 AND is_deleted = 0
                    ORDER BY id DESC LIMIT ?
                    "#
                ))
                .bind(limit as i64)
                .fetch_all(self.pool)
                .await?
            }
        };

        let mut messages: Vec<StoredMessage> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Conversation between two users, oldest first.
    #[allow(dead_code)] // The wire surface only pages public history
    pub async fn private_history(
        &self,
        user_a: i64,
        user_b: i64,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE is_private = 1 AND is_deleted = 0
              AND ((sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?))
            ORDER BY id DESC LIMIT ?
            "#
        ))
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn public(sender: &'static str, text: &'static str) -> SaveMessageParams<'static> {
        SaveMessageParams {
            sender_id: None,
            sender_name: sender,
            text,
            permission: Permission::User,
            is_system: false,
            is_private: false,
            recipient_id: None,
            recipient_name: None,
        }
    }

    #[tokio::test]
    async fn public_history_is_oldest_first() {
        let db = Database::new(":memory:").await.unwrap();
        let messages = db.messages();

        for text in ["one", "two", "three", "four"] {
            messages.save(public("alice", text)).await.unwrap();
        }

        let page = messages.public_history(3, None).await.unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three", "four"]);
    }

    #[tokio::test]
    async fn before_id_pages_backwards() {
        let db = Database::new(":memory:").await.unwrap();
        let messages = db.messages();

        let mut ids = Vec::new();
        for text in ["one", "two", "three", "four"] {
            ids.push(messages.save(public("alice", text)).await.unwrap());
        }

        let page = messages.public_history(10, Some(ids[2])).await.unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn private_messages_stay_out_of_public_history() {
        let db = Database::new(":memory:").await.unwrap();
        let messages = db.messages();

        messages.save(public("alice", "hello all")).await.unwrap();
        messages
            .save(SaveMessageParams {
                sender_id: Some(1),
                sender_name: "alice",
                text: "just for bob",
                permission: Permission::User,
                is_system: false,
                is_private: true,
                recipient_id: Some(2),
                recipient_name: Some("bob"),
            })
            .await
            .unwrap();

        let page = messages.public_history(10, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].text, "hello all");

        let conversation = messages.private_history(1, 2, 10).await.unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].text, "just for bob");
        assert_eq!(conversation[0].recipient_name.as_deref(), Some("bob"));

        // Direction should not matter.
        let reversed = messages.private_history(2, 1, 10).await.unwrap();
        assert_eq!(reversed.len(), 1);
    }
}
