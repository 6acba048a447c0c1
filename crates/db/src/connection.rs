use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use relaydesk_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool with foreign keys enforced and WAL journaling. SQLite files are
/// created on first use so `relaydesk migrate` works against a fresh path.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let url = with_create_mode(database_url);
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
}

fn with_create_mode(database_url: &str) -> String {
    let is_file = database_url.starts_with("sqlite://") && !database_url.contains(":memory:");
    if is_file && !database_url.contains("mode=") {
        let separator = if database_url.contains('?') { '&' } else { '?' };
        format!("{database_url}{separator}mode=rwc")
    } else {
        database_url.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, with_create_mode};

    #[test]
    fn file_urls_gain_create_mode_once() {
        assert_eq!(with_create_mode("sqlite://relaydesk.db"), "sqlite://relaydesk.db?mode=rwc");
        assert_eq!(
            with_create_mode("sqlite://relaydesk.db?cache=shared"),
            "sqlite://relaydesk.db?cache=shared&mode=rwc"
        );
        assert_eq!(with_create_mode("sqlite://x.db?mode=ro"), "sqlite://x.db?mode=ro");
        assert_eq!(with_create_mode("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn pool_enforces_foreign_keys() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        let enabled: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");
        assert_eq!(enabled, 1);
    }
}
