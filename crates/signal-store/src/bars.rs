use chrono::{DateTime, Utc};
use signal_core::{Bar, SignalError, Symbol};

use crate::{db_err, SignalDb};

/// Bar persistence keyed by (symbol, ts). Writes are upserts.
pub struct BarStore {
    db: SignalDb,
}

impl BarStore {
    pub(crate) fn new(db: SignalDb) -> Self {
        Self { db }
    }

    pub async fn put_bar(&self, bar: &Bar) -> Result<(), SignalError> {
        bar.validate()?;
        sqlx::query(
            "INSERT INTO bars (symbol, ts, open, high, low, close, volume)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, ts) DO UPDATE SET
                 open = excluded.open,
                 high = excluded.high,
                 low = excluded.low,
                 close = excluded.close,
                 volume = excluded.volume",
        )
        .bind(bar.symbol.as_str())
        .bind(bar.ts.to_rfc3339())
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn put_series(&self, bars: &[Bar]) -> Result<(), SignalError> {
        for bar in bars {
            self.put_bar(bar).await?;
        }
        Ok(())
    }

    pub async fn get_bar(
        &self,
        symbol: &Symbol,
        ts: DateTime<Utc>,
    ) -> Result<Option<Bar>, SignalError> {
        let row: Option<(String, String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT symbol, ts, open, high, low, close, volume FROM bars
             WHERE symbol = ? AND ts = ?",
        )
        .bind(symbol.as_str())
        .bind(ts.to_rfc3339())
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)?;

        row.map(row_to_bar).transpose()
    }

    /// Bars in [from, to], ordered by ts ascending.
    pub async fn range(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SignalError> {
        let rows: Vec<(String, String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT symbol, ts, open, high, low, close, volume FROM bars
             WHERE symbol = ? AND ts >= ? AND ts <= ?
             ORDER BY ts ASC",
        )
        .bind(symbol.as_str())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_bar).collect()
    }

    /// Most recent `limit` bars, ordered ascending.
    pub async fn latest(&self, symbol: &Symbol, limit: i64) -> Result<Vec<Bar>, SignalError> {
        let rows: Vec<(String, String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT symbol, ts, open, high, low, close, volume FROM bars
             WHERE symbol = ?
             ORDER BY ts DESC
             LIMIT ?",
        )
        .bind(symbol.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        let mut bars: Vec<Bar> = rows
            .into_iter()
            .map(row_to_bar)
            .collect::<Result<_, _>>()?;
        bars.reverse();
        Ok(bars)
    }
}

fn row_to_bar(row: (String, String, f64, f64, f64, f64, f64)) -> Result<Bar, SignalError> {
    let (symbol, ts, open, high, low, close, volume) = row;
    Ok(Bar {
        symbol: Symbol::new(&symbol)?,
        ts: DateTime::parse_from_rfc3339(&ts)
            .map_err(db_err)?
            .with_timezone(&Utc),
        open,
        high,
        low,
        close,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;
    use chrono::TimeZone;

    fn bar(ts: DateTime<Utc>, close: f64) -> Bar {
        Bar {
            symbol: Symbol::new("AAPL").unwrap(),
            ts,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let db = test_db().await;
        let store = db.bars();
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        let original = bar(ts, 100.0);

        store.put_bar(&original).await.unwrap();
        let loaded = store
            .get_bar(&original.symbol, ts)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_key() {
        let db = test_db().await;
        let store = db.bars();
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();

        store.put_bar(&bar(ts, 100.0)).await.unwrap();
        store.put_bar(&bar(ts, 105.0)).await.unwrap();

        let symbol = Symbol::new("AAPL").unwrap();
        let rows = store
            .range(&symbol, ts - chrono::Duration::days(1), ts)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 105.0);
    }

    #[tokio::test]
    async fn test_range_is_ordered_and_strictly_increasing() {
        let db = test_db().await;
        let store = db.bars();
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();

        // Insert out of order
        for offset in [3i64, 1, 2, 0] {
            store
                .put_bar(&bar(start + chrono::Duration::days(offset), 100.0 + offset as f64))
                .await
                .unwrap();
        }

        let symbol = Symbol::new("AAPL").unwrap();
        let rows = store
            .range(&symbol, start, start + chrono::Duration::days(10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        for pair in rows.windows(2) {
            assert!(pair[1].ts > pair[0].ts);
        }
    }

    #[tokio::test]
    async fn test_invalid_bar_rejected() {
        let db = test_db().await;
        let store = db.bars();
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        let mut broken = bar(ts, 100.0);
        broken.low = 150.0;

        assert!(store.put_bar(&broken).await.is_err());
    }
}
