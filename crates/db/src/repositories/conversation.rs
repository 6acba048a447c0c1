use chrono::Utc;
use sqlx::Row;

use relaydesk_core::domain::contact::ContactId;
use relaydesk_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use relaydesk_core::domain::message::{Message, NewMessage};
use relaydesk_core::domain::workspace::WorkspaceId;
use relaydesk_core::flows::DialogueState;

use super::message::insert_message;
use super::{
    decode_error, decode_timestamp, encode_timestamp, ConversationRepository, RepositoryError,
};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str =
    "id, workspace_id, contact_id, status, dialogue_state, created_at, updated_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let workspace_id: i64 = row.try_get("workspace_id").map_err(decode_error)?;
    let contact_id: i64 = row.try_get("contact_id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let dialogue_json: Option<String> = row.try_get("dialogue_state").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let dialogue = dialogue_json
        .map(|raw| serde_json::from_str::<DialogueState>(&raw))
        .transpose()
        .map_err(decode_error)?;

    Ok(Conversation {
        id: ConversationId(id),
        workspace_id: WorkspaceId(workspace_id),
        contact_id: ContactId(contact_id),
        status: status.parse::<ConversationStatus>().map_err(decode_error)?,
        dialogue,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

fn encode_dialogue(state: &DialogueState) -> Result<String, RepositoryError> {
    serde_json::to_string(state).map_err(decode_error)
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn find_open_or_create(
        &self,
        workspace_id: WorkspaceId,
        contact_id: ContactId,
    ) -> Result<Conversation, RepositoryError> {
        let select = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE workspace_id = ? AND contact_id = ? AND status != 'closed'
             ORDER BY id DESC LIMIT 1"
        );
        let existing = sqlx::query(&select)
            .bind(workspace_id.0)
            .bind(contact_id.0)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            return row_to_conversation(&row);
        }

        let now = encode_timestamp(&Utc::now());
        sqlx::query(
            "INSERT INTO conversations (workspace_id, contact_id, status, dialogue_state, created_at, updated_at)
             VALUES (?, ?, 'bot_handling', ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(workspace_id.0)
        .bind(contact_id.0)
        .bind(encode_dialogue(&DialogueState::default())?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        // A concurrent insert may have won the partial unique index; read back either way.
        let row = sqlx::query(&select)
            .bind(workspace_id.0)
            .bind(contact_id.0)
            .fetch_one(&self.pool)
            .await?;
        row_to_conversation(&row)
    }

    async fn update_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(encode_timestamp(&Utc::now()))
                .bind(id.0)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "conversation", id: id.to_string() });
        }
        Ok(())
    }

    async fn save_dialogue(
        &self,
        id: ConversationId,
        state: &DialogueState,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE conversations SET dialogue_state = ?, updated_at = ? WHERE id = ?")
                .bind(encode_dialogue(state)?)
                .bind(encode_timestamp(&Utc::now()))
                .bind(id.0)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "conversation", id: id.to_string() });
        }
        Ok(())
    }

    async fn record_bot_reply(
        &self,
        reply: NewMessage,
        state: &DialogueState,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated =
            sqlx::query("UPDATE conversations SET dialogue_state = ?, updated_at = ? WHERE id = ?")
                .bind(encode_dialogue(state)?)
                .bind(encode_timestamp(&reply.sent_at))
                .bind(reply.conversation_id.0)
                .execute(&mut *tx)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "conversation",
                id: reply.conversation_id.to_string(),
            });
        }

        let message = insert_message(&mut *tx, &reply).await?;
        tx.commit().await?;

        Ok(message)
    }
}
