use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::storage::SqliteStore;

/// `omni init`: creates the database file and schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    store.close().await;
    Ok(())
}

/// Creates the key-value table backing both storage areas. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS storage (
            area TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (area, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_storage_area ON storage(area)")
        .execute(pool)
        .await?;

    Ok(())
}
