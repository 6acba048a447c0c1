use std::collections::BTreeMap;

use sqlx::Row;

use relaydesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use relaydesk_core::domain::conversation::ConversationId;
use relaydesk_core::domain::workspace::WorkspaceId;

use super::{
    decode_error, decode_timestamp, encode_timestamp, AuditEventRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlAuditEventRepository {
    pool: DbPool,
}

impl SqlAuditEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let event_id: String = row.try_get("id").map_err(decode_error)?;
    let workspace_id: i64 = row.try_get("workspace_id").map_err(decode_error)?;
    let conversation_id: Option<i64> = row.try_get("conversation_id").map_err(decode_error)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode_error)?;
    let event_type: String = row.try_get("event_type").map_err(decode_error)?;
    let category: String = row.try_get("event_category").map_err(decode_error)?;
    let actor: String = row.try_get("actor").map_err(decode_error)?;
    let outcome: String = row.try_get("outcome").map_err(decode_error)?;
    let metadata_json: String = row.try_get("metadata").map_err(decode_error)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode_error)?;

    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).map_err(decode_error)?;

    Ok(AuditEvent {
        event_id,
        workspace_id: WorkspaceId(workspace_id),
        conversation_id: conversation_id.map(ConversationId),
        correlation_id,
        event_type,
        category: category.parse::<AuditCategory>().map_err(decode_error)?,
        actor,
        outcome: outcome.parse::<AuditOutcome>().map_err(decode_error)?,
        metadata,
        occurred_at: decode_timestamp(&occurred_at)?,
    })
}

#[async_trait::async_trait]
impl AuditEventRepository for SqlAuditEventRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata).map_err(decode_error)?;
        sqlx::query(
            "INSERT INTO audit_events
                 (id, workspace_id, conversation_id, correlation_id, event_type, event_category,
                  actor, outcome, metadata, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.workspace_id.0)
        .bind(event.conversation_id.map(|id| id.0))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(encode_timestamp(&event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, conversation_id, correlation_id, event_type, event_category,
                    actor, outcome, metadata, occurred_at
             FROM audit_events
             WHERE conversation_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}
