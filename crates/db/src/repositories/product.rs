use sqlx::Row;

use relaydesk_core::domain::product::{NewProduct, Product, ProductId};
use relaydesk_core::domain::workspace::WorkspaceId;

use super::{decode_error, ProductRepository, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, workspace_id, sku, name, price_cents, quantity, description";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id").map_err(decode_error)?),
        workspace_id: WorkspaceId(row.try_get("workspace_id").map_err(decode_error)?),
        sku: row.try_get("sku").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        price_cents: row.try_get("price_cents").map_err(decode_error)?,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
    })
}

/// Escapes LIKE wildcards so user text only ever matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn search(
        &self,
        workspace_id: WorkspaceId,
        term: &str,
        limit: u32,
    ) -> Result<Vec<Product>, RepositoryError> {
        let pattern = like_pattern(term.trim());
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE workspace_id = ?1
               AND (name LIKE ?2 ESCAPE '\\' OR IFNULL(description, '') LIKE ?2 ESCAPE '\\'
                    OR sku LIKE ?2 ESCAPE '\\')
             ORDER BY name ASC
             LIMIT ?3"
        ))
        .bind(workspace_id.0)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    async fn save(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        sqlx::query(
            "INSERT INTO products (workspace_id, sku, name, price_cents, quantity, description)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(workspace_id, sku) DO UPDATE SET
                 name = excluded.name,
                 price_cents = excluded.price_cents,
                 quantity = excluded.quantity,
                 description = excluded.description",
        )
        .bind(product.workspace_id.0)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.quantity)
        .bind(&product.description)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE workspace_id = ? AND sku = ?"
        ))
        .bind(product.workspace_id.0)
        .bind(&product.sku)
        .fetch_one(&self.pool)
        .await?;

        row_to_product(&row)
    }
}

#[cfg(test)]
mod tests {
    use relaydesk_core::domain::product::NewProduct;
    use relaydesk_core::domain::workspace::WorkspaceId;

    use super::{like_pattern, SqlProductRepository};
    use crate::repositories::test_support::{insert_workspace, setup};
    use crate::repositories::ProductRepository;

    fn product(workspace_id: WorkspaceId, sku: &str, name: &str, description: &str) -> NewProduct {
        NewProduct {
            workspace_id,
            sku: sku.to_string(),
            name: name.to_string(),
            price_cents: 1000,
            quantity: 5,
            description: Some(description.to_string()),
        }
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn search_matches_name_description_and_sku_case_insensitively() {
        let pool = setup().await;
        let workspace = insert_workspace(&pool, 1).await;
        let other = insert_workspace(&pool, 2).await;
        let repo = SqlProductRepository::new(pool);

        repo.save(product(workspace, "AMX-500", "Amoxicilina 500mg", "antibiótico"))
            .await
            .expect("save");
        repo.save(product(workspace, "DIP-1G", "Dipirona 1g", "analgésico para febre"))
            .await
            .expect("save");
        repo.save(product(other, "AMX-500", "Amoxicilina 500mg", "outro workspace"))
            .await
            .expect("save");

        let by_name = repo.search(workspace, "amoxi", 10).await.expect("search");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "Amoxicilina 500mg");

        let by_description = repo.search(workspace, "FEBRE", 10).await.expect("search");
        assert_eq!(by_description.len(), 1);

        let by_sku = repo.search(workspace, "dip-1", 10).await.expect("search");
        assert_eq!(by_sku[0].sku, "DIP-1G");
    }

    #[tokio::test]
    async fn save_upserts_by_sku() {
        let pool = setup().await;
        let workspace = insert_workspace(&pool, 1).await;
        let repo = SqlProductRepository::new(pool);

        let first = repo.save(product(workspace, "AMX-500", "Amoxicilina", "x")).await.expect("save");
        let mut changed = product(workspace, "AMX-500", "Amoxicilina 500mg", "x");
        changed.price_cents = 2500;
        let second = repo.save(changed).await.expect("upsert");

        assert_eq!(first.id, second.id);
        assert_eq!(second.price_cents, 2500);
    }
}
