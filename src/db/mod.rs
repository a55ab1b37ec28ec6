//! Client database bootstrap: the connection pool and schema migrations for
//! the local replica.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

/// Open the local database, creating it if needed, and run migrations.
/// Without an explicit path the database lives in the platform data directory.
pub async fn init_client_db(db_path: Option<PathBuf>) -> Result<SqlitePool, sqlx::Error> {
    let path = match db_path {
        Some(path) => path,
        None => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pomotrack")
            .join("pomotrack.db"),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations/client").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_client_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let pool = init_client_db(Some(temp_dir.path().join("local.db")))
            .await
            .unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"events"));
        assert!(table_names.contains(&"system_events"));
        assert!(table_names.contains(&"settings"));
        assert!(table_names.contains(&"sync_meta"));
    }

    #[tokio::test]
    async fn test_init_client_db_is_reentrant() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("local.db");

        let pool = init_client_db(Some(path.clone())).await.unwrap();
        drop(pool);
        // Re-opening an existing database re-runs migrations harmlessly.
        init_client_db(Some(path)).await.unwrap();
    }
}
