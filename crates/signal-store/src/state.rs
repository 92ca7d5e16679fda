use signal_core::SignalError;

use crate::{db_err, SignalDb};

/// Key-value state that survives restarts (watchlist, counters).
pub struct StateStore {
    db: SignalDb,
}

impl StateStore {
    pub(crate) fn new(db: SignalDb) -> Self {
        Self { db }
    }

    pub async fn save(&self, key: &str, value: &str) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<String>, SignalError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err)?;
        Ok(row.map(|(v,)| v))
    }

    /// Persist the watchlist as a comma-separated symbol list.
    pub async fn save_watchlist(&self, symbols: &[String]) -> Result<(), SignalError> {
        self.save("watchlist", &symbols.join(",")).await
    }

    pub async fn load_watchlist(&self) -> Result<Vec<String>, SignalError> {
        Ok(self
            .load("watchlist")
            .await?
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    #[tokio::test]
    async fn test_state_round_trip() {
        let db = test_db().await;
        let store = db.state();

        assert!(store.load("missing").await.unwrap().is_none());
        store.save("k", "v1").await.unwrap();
        store.save("k", "v2").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_watchlist_round_trip() {
        let db = test_db().await;
        let store = db.state();

        store
            .save_watchlist(&["AAPL".to_string(), "TSLA".to_string()])
            .await
            .unwrap();
        assert_eq!(store.load_watchlist().await.unwrap(), vec!["AAPL", "TSLA"]);
    }
}
