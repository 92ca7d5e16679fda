use chrono::{DateTime, Utc};
use signal_core::{Alert, AlertPriority, CandidateKind, SignalError, Symbol};

use crate::{db_err, SignalDb};

/// Alert persistence keyed by the cooldown-bucketed dedup id.
pub struct AlertStore {
    db: SignalDb,
}

impl AlertStore {
    pub(crate) fn new(db: SignalDb) -> Self {
        Self { db }
    }

    /// Insert the alert unless its id already exists. Returns false on a
    /// dedup hit, in which case nothing is written.
    pub async fn put_if_absent(&self, alert: &Alert) -> Result<bool, SignalError> {
        let attempted = serde_json::to_string(&alert.channels_attempted).map_err(db_err)?;
        let succeeded = serde_json::to_string(&alert.channels_succeeded).map_err(db_err)?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO alerts
                 (id, symbol, kind, priority, title, body, created_at,
                  channels_attempted, channels_succeeded, ack_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&alert.id)
        .bind(alert.symbol.as_str())
        .bind(alert.kind.as_str())
        .bind(alert.priority.as_str())
        .bind(&alert.title)
        .bind(&alert.body)
        .bind(alert.created_at.to_rfc3339())
        .bind(attempted)
        .bind(succeeded)
        .bind(alert.ack_at.map(|t| t.to_rfc3339()))
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    /// Record per-channel delivery outcome after dispatch.
    pub async fn record_outcome(
        &self,
        id: &str,
        channels_attempted: &[String],
        channels_succeeded: &[String],
    ) -> Result<(), SignalError> {
        let attempted = serde_json::to_string(channels_attempted).map_err(db_err)?;
        let succeeded = serde_json::to_string(channels_succeeded).map_err(db_err)?;
        sqlx::query(
            "UPDATE alerts SET channels_attempted = ?, channels_succeeded = ? WHERE id = ?",
        )
        .bind(attempted)
        .bind(succeeded)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Acknowledge an alert; only `ack_at` ever mutates after delivery.
    pub async fn ack(&self, id: &str, at: DateTime<Utc>) -> Result<bool, SignalError> {
        let result = sqlx::query("UPDATE alerts SET ack_at = ? WHERE id = ? AND ack_at IS NULL")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Alert>, SignalError> {
        let row: Option<AlertRow> = sqlx::query_as(
            "SELECT id, symbol, kind, priority, title, body, created_at,
                    channels_attempted, channels_succeeded, ack_at
             FROM alerts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)?;

        row.map(row_to_alert).transpose()
    }

    /// Alerts created since `since`, newest first.
    pub async fn recent(&self, since: DateTime<Utc>) -> Result<Vec<Alert>, SignalError> {
        let rows: Vec<AlertRow> = sqlx::query_as(
            "SELECT id, symbol, kind, priority, title, body, created_at,
                    channels_attempted, channels_succeeded, ack_at
             FROM alerts
             WHERE created_at >= ?
             ORDER BY created_at DESC",
        )
        .bind(since.to_rfc3339())
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_alert).collect()
    }
}

type AlertRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
);

fn parse_kind(raw: &str) -> CandidateKind {
    match raw {
        "PREMARKET_CATALYST" => CandidateKind::PremarketCatalyst,
        "INTRADAY_PUMP" => CandidateKind::IntradayPump,
        "INTRADAY_EXIT" => CandidateKind::IntradayExit,
        _ => CandidateKind::Opportunity,
    }
}

fn parse_priority(raw: &str) -> AlertPriority {
    match raw {
        "CRITICAL" => AlertPriority::Critical,
        "HIGH" => AlertPriority::High,
        "MEDIUM" => AlertPriority::Medium,
        _ => AlertPriority::Low,
    }
}

fn row_to_alert(row: AlertRow) -> Result<Alert, SignalError> {
    let (id, symbol, kind, priority, title, body, created_at, attempted, succeeded, ack_at) = row;
    Ok(Alert {
        id,
        symbol: Symbol::new(&symbol)?,
        kind: parse_kind(&kind),
        priority: parse_priority(&priority),
        title,
        body,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(db_err)?
            .with_timezone(&Utc),
        channels_attempted: serde_json::from_str(&attempted).unwrap_or_default(),
        channels_succeeded: serde_json::from_str(&succeeded).unwrap_or_default(),
        ack_at: ack_at
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(db_err)?
            .map(|t| t.with_timezone(&Utc)),
    })
}
