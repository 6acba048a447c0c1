use chrono::{DateTime, Utc};
use sqlx::Row;

use relaydesk_core::domain::conversation::ConversationId;
use relaydesk_core::domain::message::{Message, MessageId, MessageKind, NewMessage, SenderKind};

use super::{decode_error, decode_timestamp, encode_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_type, content, message_type, media_url, sent_at";

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let conversation_id: i64 = row.try_get("conversation_id").map_err(decode_error)?;
    let sender: String = row.try_get("sender_type").map_err(decode_error)?;
    let content: String = row.try_get("content").map_err(decode_error)?;
    let kind: String = row.try_get("message_type").map_err(decode_error)?;
    let media_url: Option<String> = row.try_get("media_url").map_err(decode_error)?;
    let sent_at: String = row.try_get("sent_at").map_err(decode_error)?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation_id),
        sender: sender.parse::<SenderKind>().map_err(decode_error)?,
        content,
        kind: kind.parse::<MessageKind>().map_err(decode_error)?,
        media_url,
        sent_at: decode_timestamp(&sent_at)?,
    })
}

/// Inserts on any executor so the conversation repository can reuse it inside
/// its reply transaction.
pub(crate) async fn insert_message<'e, E>(
    executor: E,
    message: &NewMessage,
) -> Result<Message, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO messages (conversation_id, sender_type, content, message_type, media_url, sent_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(message.conversation_id.0)
    .bind(message.sender.as_str())
    .bind(&message.content)
    .bind(message.kind.as_str())
    .bind(&message.media_url)
    .bind(encode_timestamp(&message.sent_at))
    .execute(executor)
    .await?;

    Ok(Message {
        id: MessageId(result.last_insert_rowid()),
        conversation_id: message.conversation_id,
        sender: message.sender,
        content: message.content.clone(),
        kind: message.kind,
        media_url: message.media_url.clone(),
        sent_at: message.sent_at,
    })
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        insert_message(&self.pool, &message).await
    }

    async fn recent(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?
             ORDER BY sent_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(conversation_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn count_since(
        &self,
        conversation_id: ConversationId,
        sender: SenderKind,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM messages
             WHERE conversation_id = ? AND sender_type = ? AND sent_at >= ?",
        )
        .bind(conversation_id.0)
        .bind(sender.as_str())
        .bind(encode_timestamp(&since))
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(count).map_err(decode_error)
    }
}
