use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use relaydesk_core::domain::workspace::{ChatInstance, InstanceKey, Workspace, WorkspaceId};

use super::{decode_error, encode_timestamp, RepositoryError, WorkspaceRepository};
use crate::DbPool;

pub struct SqlWorkspaceRepository {
    pool: DbPool,
}

impl SqlWorkspaceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<ChatInstance, RepositoryError> {
    let key: String = row.try_get("instance_key").map_err(decode_error)?;
    let workspace_id: i64 = row.try_get("workspace_id").map_err(decode_error)?;
    let display_name: Option<String> = row.try_get("display_name").map_err(decode_error)?;
    Ok(ChatInstance { key: InstanceKey(key), workspace_id: WorkspaceId(workspace_id), display_name })
}

#[async_trait::async_trait]
impl WorkspaceRepository for SqlWorkspaceRepository {
    async fn find_by_id(&self, id: WorkspaceId) -> Result<Option<Workspace>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, metadata FROM workspaces WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let name: String = row.try_get("name").map_err(decode_error)?;
        let metadata_json: String = row.try_get("metadata").map_err(decode_error)?;
        let metadata: Value = serde_json::from_str(&metadata_json).map_err(decode_error)?;

        Ok(Some(Workspace { id, name, metadata }))
    }

    async fn save(&self, workspace: Workspace) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&workspace.metadata).map_err(decode_error)?;
        sqlx::query(
            "INSERT INTO workspaces (id, name, metadata, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 metadata = excluded.metadata",
        )
        .bind(workspace.id.0)
        .bind(&workspace.name)
        .bind(metadata_json)
        .bind(encode_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_instance(
        &self,
        key: &InstanceKey,
    ) -> Result<Option<ChatInstance>, RepositoryError> {
        let row = sqlx::query(
            "SELECT instance_key, workspace_id, display_name
             FROM whatsapp_instances WHERE instance_key = ?",
        )
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn save_instance(&self, instance: ChatInstance) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO whatsapp_instances (instance_key, workspace_id, display_name)
             VALUES (?, ?, ?)
             ON CONFLICT(instance_key) DO UPDATE SET
                 workspace_id = excluded.workspace_id,
                 display_name = excluded.display_name",
        )
        .bind(&instance.key.0)
        .bind(instance.workspace_id.0)
        .bind(&instance.display_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<ChatInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT instance_key, workspace_id, display_name
             FROM whatsapp_instances ORDER BY instance_key ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instance).collect()
    }
}
