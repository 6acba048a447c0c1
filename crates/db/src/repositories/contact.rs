use chrono::Utc;
use sqlx::Row;

use relaydesk_core::domain::contact::{Contact, ContactId, ContactMetadata, KanbanStatus};
use relaydesk_core::domain::workspace::WorkspaceId;

use super::{
    decode_error, decode_timestamp, encode_timestamp, ContactRepository, RepositoryError,
};
use crate::DbPool;

const CONTACT_COLUMNS: &str =
    "id, workspace_id, whatsapp_number, name, kanban_status, metadata, created_at, updated_at";

pub struct SqlContactRepository {
    pool: DbPool,
}

impl SqlContactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_contact(row: &sqlx::sqlite::SqliteRow) -> Result<Contact, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let workspace_id: i64 = row.try_get("workspace_id").map_err(decode_error)?;
    let address: String = row.try_get("whatsapp_number").map_err(decode_error)?;
    let name: Option<String> = row.try_get("name").map_err(decode_error)?;
    let status_raw: String = row.try_get("kanban_status").map_err(decode_error)?;
    let metadata_json: String = row.try_get("metadata").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let status = status_raw.parse::<KanbanStatus>().map_err(decode_error)?;
    let metadata: ContactMetadata = serde_json::from_str(&metadata_json).map_err(decode_error)?;

    Ok(Contact {
        id: ContactId(id),
        workspace_id: WorkspaceId(workspace_id),
        address,
        name,
        status,
        metadata,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

impl SqlContactRepository {
    async fn touch(&self, query: &str, id: ContactId, value: String) -> Result<(), RepositoryError> {
        let result = sqlx::query(query)
            .bind(value)
            .bind(encode_timestamp(&Utc::now()))
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "contact", id: id.to_string() });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContactRepository for SqlContactRepository {
    async fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_contact).transpose()
    }

    async fn find_or_create(
        &self,
        workspace_id: WorkspaceId,
        address: &str,
    ) -> Result<Contact, RepositoryError> {
        let now = encode_timestamp(&Utc::now());
        sqlx::query(
            "INSERT INTO contacts (workspace_id, whatsapp_number, kanban_status, metadata, created_at, updated_at)
             VALUES (?, ?, 'new_contact', '{}', ?, ?)
             ON CONFLICT(workspace_id, whatsapp_number) DO NOTHING",
        )
        .bind(workspace_id.0)
        .bind(address)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE workspace_id = ? AND whatsapp_number = ?"
        ))
        .bind(workspace_id.0)
        .bind(address)
        .fetch_one(&self.pool)
        .await?;

        row_to_contact(&row)
    }

    async fn update_status(
        &self,
        id: ContactId,
        status: &KanbanStatus,
    ) -> Result<(), RepositoryError> {
        self.touch(
            "UPDATE contacts SET kanban_status = ?, updated_at = ? WHERE id = ?",
            id,
            status.as_str(),
        )
        .await
    }

    async fn update_metadata(
        &self,
        id: ContactId,
        metadata: &ContactMetadata,
    ) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(metadata).map_err(decode_error)?;
        self.touch("UPDATE contacts SET metadata = ?, updated_at = ? WHERE id = ?", id, metadata_json)
            .await
    }

    async fn update_name(&self, id: ContactId, name: &str) -> Result<(), RepositoryError> {
        self.touch("UPDATE contacts SET name = ?, updated_at = ? WHERE id = ?", id, name.to_owned())
            .await
    }
}
