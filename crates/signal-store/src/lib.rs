use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use signal_core::SignalError;

pub mod alerts;
pub mod articles;
pub mod bars;
pub mod scores;
pub mod state;

pub use alerts::AlertStore;
pub use articles::ArticleStore;
pub use bars::BarStore;
pub use scores::ScoreStore;
pub use state::StateStore;

/// Default retention horizon for the daily trim.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Shared sqlite handle. Schema is created on connect; all writes are
/// upserts on the row key so replays and concurrent writers are safe.
#[derive(Clone)]
pub struct SignalDb {
    pool: SqlitePool,
}

impl SignalDb {
    pub async fn connect(database_url: &str) -> Result<Self, SignalError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), SignalError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                ts TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, ts)
            )",
            "CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                symbol TEXT,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                source TEXT NOT NULL,
                url TEXT,
                published_at TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                polarity REAL,
                label TEXT,
                catalyst_tags TEXT NOT NULL DEFAULT '[]'
            )",
            "CREATE INDEX IF NOT EXISTS idx_articles_symbol_published
             ON articles (symbol, published_at DESC)",
            "CREATE TABLE IF NOT EXISTS scores (
                symbol TEXT NOT NULL,
                as_of TEXT NOT NULL,
                scan_kind TEXT NOT NULL,
                total REAL NOT NULL,
                trend REAL NOT NULL,
                momentum REAL NOT NULL,
                sentiment REAL NOT NULL,
                divergence REAL NOT NULL,
                volume REAL NOT NULL,
                recommendation TEXT NOT NULL,
                conviction TEXT NOT NULL,
                entry REAL,
                stop REAL,
                target REAL,
                rr REAL,
                confidence REAL NOT NULL,
                PRIMARY KEY (symbol, as_of, scan_kind)
            )",
            "CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                priority TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                channels_attempted TEXT NOT NULL DEFAULT '[]',
                channels_succeeded TEXT NOT NULL DEFAULT '[]',
                ack_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn bars(&self) -> BarStore {
        BarStore::new(self.clone())
    }

    pub fn articles(&self) -> ArticleStore {
        ArticleStore::new(self.clone())
    }

    pub fn scores(&self) -> ScoreStore {
        ScoreStore::new(self.clone())
    }

    pub fn alerts(&self) -> AlertStore {
        AlertStore::new(self.clone())
    }

    pub fn state(&self) -> StateStore {
        StateStore::new(self.clone())
    }

    /// Trim rows older than the retention horizon from every table.
    pub async fn trim_retention(&self, days: i64) -> Result<u64, SignalError> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let mut removed = 0u64;

        for (table, column) in [
            ("bars", "ts"),
            ("articles", "published_at"),
            ("scores", "as_of"),
            ("alerts", "created_at"),
        ] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE {} < ?", table, column))
                .bind(&cutoff)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            removed += result.rows_affected();
        }

        if removed > 0 {
            tracing::info!("Retention trim removed {} rows older than {}d", removed, days);
        }
        Ok(removed)
    }
}

pub(crate) fn db_err(e: impl std::fmt::Display) -> SignalError {
    SignalError::Database(e.to_string())
}

#[cfg(test)]
pub(crate) async fn test_db() -> SignalDb {
    SignalDb::connect("sqlite::memory:")
        .await
        .expect("in-memory db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_creates() {
        let db = test_db().await;
        assert!(db.pool().acquire().await.is_ok());
        // Idempotent re-init
        db.init_schema().await.unwrap();
    }
}
