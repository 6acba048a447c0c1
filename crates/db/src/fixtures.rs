use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

pub const DEMO_WORKSPACE_ID: i64 = 1001;
pub const DEMO_INSTANCE_KEY: &str = "demo-farmacia-vida";

/// Catalog rows the demo seed must contain: sku, name, price in cents.
const SEED_PRODUCTS: &[(&str, &str, i64)] = &[
    ("AMX-500", "Amoxicilina 500mg", 2500),
    ("DIP-1G", "Dipirona 1g", 890),
    ("PAR-750", "Paracetamol 750mg", 1250),
    ("IBU-400", "Ibuprofeno 400mg", 1590),
    ("LOR-10", "Loratadina 10mg", 1120),
    ("VTC-1G", "Vitamina C 1g", 2290),
    ("SOR-500", "Soro Fisiológico 500ml", 690),
    ("PRO-FPS50", "Protetor Solar FPS 50", 5490),
];

/// Demo pharmacy workspace used by `relaydesk seed` and local smoke runs.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            workspace_id: DEMO_WORKSPACE_ID,
            instance_key: DEMO_INSTANCE_KEY,
            products_seeded: SEED_PRODUCTS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let workspace_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM workspaces WHERE id = ?1)")
                .bind(DEMO_WORKSPACE_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("workspace", workspace_exists == 1));

        let instance_ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM whatsapp_instances WHERE instance_key = ?1 AND workspace_id = ?2)",
        )
        .bind(DEMO_INSTANCE_KEY)
        .bind(DEMO_WORKSPACE_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("instance", instance_ok == 1));

        let bot_active: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM bot_configs WHERE workspace_id = ?1 AND is_active = 1)",
        )
        .bind(DEMO_WORKSPACE_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("bot-config-active", bot_active == 1));

        let mut catalog_ok = true;
        for (sku, name, price_cents) in SEED_PRODUCTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM products
                   WHERE workspace_id = ?1 AND sku = ?2 AND name = ?3 AND price_cents = ?4)",
            )
            .bind(DEMO_WORKSPACE_ID)
            .bind(sku)
            .bind(name)
            .bind(price_cents)
            .fetch_one(pool)
            .await?;
            catalog_ok &= present == 1;
        }
        checks.push(("catalog", catalog_ok));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo workspace; cascades take its rows with it.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM workspaces WHERE id = ?1")
            .bind(DEMO_WORKSPACE_ID)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub workspace_id: i64,
    pub instance_key: &'static str,
    pub products_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
