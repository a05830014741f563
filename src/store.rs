use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::GameResult;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://newsle.db";

const SCHEMA: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared SQLite pool holding the players and plays tables.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn connect(url: &str) -> GameResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        // Every connection to `:memory:` is a separate database, so pin one.
        let pool = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };
        info!(%url, "Connected to database");
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn in_memory() -> GameResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> GameResult<()> {
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if stmt.is_empty() {
                continue;
            }
            debug!(statement = stmt, "Applying schema statement");
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_reapplicable() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(name,)| name).collect();
        assert!(names.contains(&"players".to_string()));
        assert!(names.contains(&"plays".to_string()));
    }
}
