use chrono::{DateTime, Utc};
use signal_core::{
    ComponentScores, Conviction, MonthlyScore, Recommendation, ScanKind, SignalError, Symbol,
};

use crate::{db_err, SignalDb};

/// Score persistence keyed by (symbol, as_of, scan_kind).
pub struct ScoreStore {
    db: SignalDb,
}

impl ScoreStore {
    pub(crate) fn new(db: SignalDb) -> Self {
        Self { db }
    }

    pub async fn put(&self, score: &MonthlyScore, kind: ScanKind) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO scores
                 (symbol, as_of, scan_kind, total, trend, momentum, sentiment,
                  divergence, volume, recommendation, conviction, entry, stop,
                  target, rr, confidence)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, as_of, scan_kind) DO UPDATE SET
                 total = excluded.total,
                 trend = excluded.trend,
                 momentum = excluded.momentum,
                 sentiment = excluded.sentiment,
                 divergence = excluded.divergence,
                 volume = excluded.volume,
                 recommendation = excluded.recommendation,
                 conviction = excluded.conviction,
                 entry = excluded.entry,
                 stop = excluded.stop,
                 target = excluded.target,
                 rr = excluded.rr,
                 confidence = excluded.confidence",
        )
        .bind(score.symbol.as_str())
        .bind(score.as_of.to_rfc3339())
        .bind(kind.as_str())
        .bind(score.total)
        .bind(score.components.trend)
        .bind(score.components.momentum)
        .bind(score.components.sentiment)
        .bind(score.components.divergence)
        .bind(score.components.volume)
        .bind(score.recommendation.as_str())
        .bind(score.conviction.as_str())
        .bind(score.entry)
        .bind(score.stop)
        .bind(score.target)
        .bind(score.risk_reward)
        .bind(score.confidence)
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(
        &self,
        symbol: &Symbol,
        as_of: DateTime<Utc>,
        kind: ScanKind,
    ) -> Result<Option<MonthlyScore>, SignalError> {
        let row: Option<ScoreRow> = sqlx::query_as(
            "SELECT symbol, as_of, total, trend, momentum, sentiment, divergence,
                    volume, entry, stop, target, rr, confidence
             FROM scores
             WHERE symbol = ? AND as_of = ? AND scan_kind = ?",
        )
        .bind(symbol.as_str())
        .bind(as_of.to_rfc3339())
        .bind(kind.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)?;

        row.map(row_to_score).transpose()
    }

    /// Latest scores for a symbol, newest first.
    pub async fn latest(
        &self,
        symbol: &Symbol,
        limit: i64,
    ) -> Result<Vec<MonthlyScore>, SignalError> {
        let rows: Vec<ScoreRow> = sqlx::query_as(
            "SELECT symbol, as_of, total, trend, momentum, sentiment, divergence,
                    volume, entry, stop, target, rr, confidence
             FROM scores
             WHERE symbol = ?
             ORDER BY as_of DESC
             LIMIT ?",
        )
        .bind(symbol.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_score).collect()
    }
}

type ScoreRow = (
    String,
    String,
    f64,
    f64,
    f64,
    f64,
    f64,
    f64,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    f64,
);

fn row_to_score(row: ScoreRow) -> Result<MonthlyScore, SignalError> {
    let (
        symbol,
        as_of,
        total,
        trend,
        momentum,
        sentiment,
        divergence,
        volume,
        entry,
        stop,
        target,
        rr,
        confidence,
    ) = row;
    Ok(MonthlyScore {
        symbol: Symbol::new(&symbol)?,
        as_of: DateTime::parse_from_rfc3339(&as_of)
            .map_err(db_err)?
            .with_timezone(&Utc),
        total,
        components: ComponentScores {
            trend,
            momentum,
            sentiment,
            divergence,
            volume,
        },
        recommendation: Recommendation::from_total(total),
        conviction: Conviction::from_total(total),
        entry,
        stop,
        target,
        risk_reward: rr,
        confidence,
        reasons: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;
    use chrono::TimeZone;

    fn score(total: f64, as_of: DateTime<Utc>) -> MonthlyScore {
        let components = ComponentScores {
            trend: total,
            momentum: total,
            sentiment: total,
            divergence: total,
            volume: total,
        };
        MonthlyScore {
            symbol: Symbol::new("ACME").unwrap(),
            as_of,
            total: components.weighted_total(),
            components,
            recommendation: Recommendation::from_total(total),
            conviction: Conviction::from_total(total),
            entry: Some(100.0),
            stop: Some(92.0),
            target: Some(120.0),
            risk_reward: Some(2.5),
            confidence: 0.8,
            reasons: vec![],
        }
    }

    #[tokio::test]
    async fn test_weighted_total_invariant_survives_round_trip() {
        let db = test_db().await;
        let store = db.scores();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 21, 0, 0).unwrap();

        store.put(&score(87.0, at), ScanKind::Opportunity).await.unwrap();
        let loaded = store
            .get(&Symbol::new("ACME").unwrap(), at, ScanKind::Opportunity)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.total, loaded.components.weighted_total());
        assert_eq!(loaded.risk_reward, Some(2.5));
    }

    #[tokio::test]
    async fn test_append_per_scan_kind(){
        let db = test_db().await;
        let store = db.scores();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 21, 0, 0).unwrap();

        store.put(&score(87.0, at), ScanKind::Opportunity).await.unwrap();
        store.put(&score(87.0, at), ScanKind::Monthly).await.unwrap();
        // Same key overwrites instead of duplicating
        store.put(&score(90.0, at), ScanKind::Monthly).await.unwrap();

        let rows = store
            .latest(&Symbol::new("ACME").unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
