use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

/// Initialize the server database pool and run migrations.
///
/// Defaults to `<data dir>/pomotrack/server.db` when no path is given.
pub async fn init_server_db(db_path: Option<PathBuf>) -> Result<SqlitePool, sqlx::Error> {
    let path = match db_path {
        Some(path) => path,
        None => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pomotrack")
            .join("server.db"),
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

    sqlx::migrate!("./migrations/server").run(&pool).await?;

    Ok(pool)
}
