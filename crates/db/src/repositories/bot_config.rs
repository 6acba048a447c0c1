use sqlx::Row;

use relaydesk_core::domain::bot_config::{BotConfig, TransferRule};
use relaydesk_core::domain::workspace::WorkspaceId;

use super::{decode_error, BotConfigRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBotConfigRepository {
    pool: DbPool,
}

impl SqlBotConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BotConfigRepository for SqlBotConfigRepository {
    async fn find(&self, workspace_id: WorkspaceId) -> Result<Option<BotConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT master_prompt, is_active, transfer_rules FROM bot_configs WHERE workspace_id = ?",
        )
        .bind(workspace_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let master_prompt: Option<String> = row.try_get("master_prompt").map_err(decode_error)?;
        let is_active: bool = row.try_get("is_active").map_err(decode_error)?;
        let rules_json: String = row.try_get("transfer_rules").map_err(decode_error)?;
        let transfer_rules: Vec<TransferRule> =
            serde_json::from_str(&rules_json).map_err(decode_error)?;

        Ok(Some(BotConfig { workspace_id, master_prompt, is_active, transfer_rules }))
    }

    async fn save(&self, config: BotConfig) -> Result<(), RepositoryError> {
        let rules_json = serde_json::to_string(&config.transfer_rules).map_err(decode_error)?;
        sqlx::query(
            "INSERT INTO bot_configs (workspace_id, master_prompt, is_active, transfer_rules)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(workspace_id) DO UPDATE SET
                 master_prompt = excluded.master_prompt,
                 is_active = excluded.is_active,
                 transfer_rules = excluded.transfer_rules",
        )
        .bind(config.workspace_id.0)
        .bind(&config.master_prompt)
        .bind(config.is_active)
        .bind(rules_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relaydesk_core::domain::bot_config::{BotConfig, TransferRule, TransferSignal};

    use super::SqlBotConfigRepository;
    use crate::repositories::test_support::{insert_workspace, setup};
    use crate::repositories::BotConfigRepository;

    #[tokio::test]
    async fn transfer_rules_survive_save_and_upsert() {
        let pool = setup().await;
        let workspace = insert_workspace(&pool, 1).await;
        let repo = SqlBotConfigRepository::new(pool);

        let mut config = BotConfig {
            workspace_id: workspace,
            master_prompt: Some("Você é a assistente da Farmácia Vida.".to_string()),
            is_active: true,
            transfer_rules: vec![TransferRule {
                signal: TransferSignal::Keyword,
                value: "gerente".to_string(),
                action: "transfer".to_string(),
            }],
        };
        repo.save(config.clone()).await.expect("save");
        assert_eq!(repo.find(workspace).await.expect("find"), Some(config.clone()));

        config.is_active = false;
        repo.save(config.clone()).await.expect("upsert");
        let stored = repo.find(workspace).await.expect("find").expect("exists");
        assert!(!stored.is_active);
        assert_eq!(stored.transfer_rules.len(), 1);
    }
}
