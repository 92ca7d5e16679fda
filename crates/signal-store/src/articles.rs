use chrono::{DateTime, Utc};
use signal_core::{Article, CatalystTag, SentimentScore, SignalError, Symbol};

use crate::{db_err, SignalDb};

/// Article persistence keyed by content id, with a (symbol, published_at)
/// secondary index for the sentiment window reads.
pub struct ArticleStore {
    db: SignalDb,
}

impl ArticleStore {
    pub(crate) fn new(db: SignalDb) -> Self {
        Self { db }
    }

    /// Upsert; returns true when the row was newly inserted.
    pub async fn put(&self, article: &Article) -> Result<bool, SignalError> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM articles WHERE id = ?")
                .bind(&article.id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(db_err)?;

        let tags = serde_json::to_string(&article.catalyst_tags).map_err(db_err)?;
        sqlx::query(
            "INSERT INTO articles
                 (id, symbol, title, body, source, url, published_at, fetched_at,
                  polarity, label, catalyst_tags)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 symbol = COALESCE(articles.symbol, excluded.symbol),
                 source = excluded.source,
                 fetched_at = excluded.fetched_at,
                 polarity = excluded.polarity,
                 label = excluded.label,
                 catalyst_tags = excluded.catalyst_tags
             WHERE excluded.fetched_at >= articles.fetched_at",
        )
        .bind(&article.id)
        .bind(article.symbol.as_ref().map(|s| s.as_str().to_string()))
        .bind(&article.title)
        .bind(&article.body)
        .bind(&article.source)
        .bind(&article.url)
        .bind(article.published_at.to_rfc3339())
        .bind(article.fetched_at.to_rfc3339())
        .bind(article.sentiment.map(|s| s.polarity))
        .bind(article.sentiment.map(|s| s.label.as_str().to_string()))
        .bind(tags)
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(existing.is_none())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Article>, SignalError> {
        let row: Option<ArticleRow> = sqlx::query_as(
            "SELECT id, symbol, title, body, source, url, published_at, fetched_at,
                    polarity, label, catalyst_tags
             FROM articles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)?;

        row.map(row_to_article).transpose()
    }

    /// Articles for a symbol published since `since`, newest first.
    pub async fn recent_for_symbol(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
    ) -> Result<Vec<Article>, SignalError> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            "SELECT id, symbol, title, body, source, url, published_at, fetched_at,
                    polarity, label, catalyst_tags
             FROM articles
             WHERE symbol = ? AND published_at >= ?
             ORDER BY published_at DESC",
        )
        .bind(symbol.as_str())
        .bind(since.to_rfc3339())
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_article).collect()
    }

    /// All articles published since `since`, newest first.
    pub async fn recent(&self, since: DateTime<Utc>) -> Result<Vec<Article>, SignalError> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            "SELECT id, symbol, title, body, source, url, published_at, fetched_at,
                    polarity, label, catalyst_tags
             FROM articles
             WHERE published_at >= ?
             ORDER BY published_at DESC",
        )
        .bind(since.to_rfc3339())
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_article).collect()
    }
}

type ArticleRow = (
    String,
    Option<String>,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    Option<f64>,
    Option<String>,
    String,
);

fn row_to_article(row: ArticleRow) -> Result<Article, SignalError> {
    let (id, symbol, title, body, source, url, published_at, fetched_at, polarity, _label, tags) =
        row;
    let catalyst_tags: Vec<CatalystTag> = serde_json::from_str(&tags).unwrap_or_default();
    Ok(Article {
        id,
        symbol: symbol.as_deref().map(Symbol::new).transpose()?,
        title,
        body,
        source,
        url,
        published_at: DateTime::parse_from_rfc3339(&published_at)
            .map_err(db_err)?
            .with_timezone(&Utc),
        fetched_at: DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(db_err)?
            .with_timezone(&Utc),
        sentiment: polarity.map(|p| SentimentScore::new(p, 1.0)),
        catalyst_tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;
    use chrono::{Duration, TimeZone};

    fn article(id_seed: &str, symbol: Option<&str>, published_at: DateTime<Utc>) -> Article {
        Article {
            id: Article::compute_id(Some(id_seed), "feed", "title", published_at),
            symbol: symbol.map(|s| Symbol::new(s).unwrap()),
            title: "ACME earnings beat".to_string(),
            body: "body".to_string(),
            source: "feed".to_string(),
            url: Some(id_seed.to_string()),
            published_at,
            fetched_at: published_at,
            sentiment: Some(SentimentScore::new(0.5, 0.8)),
            catalyst_tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_dedup_by_id() {
        let db = test_db().await;
        let store = db.articles();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        let a = article("https://n/1", Some("ACME"), at);
        store.put(&a).await.unwrap();
        store.put(&a).await.unwrap();

        let rows = store.recent(at - Duration::hours(1)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_symbol_window_query() {
        let db = test_db().await;
        let store = db.articles();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        store.put(&article("https://n/1", Some("ACME"), at)).await.unwrap();
        store
            .put(&article("https://n/2", Some("ACME"), at - Duration::days(40)))
            .await
            .unwrap();
        store.put(&article("https://n/3", Some("TSLA"), at)).await.unwrap();

        let symbol = Symbol::new("ACME").unwrap();
        let rows = store
            .recent_for_symbol(&symbol, at - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol.as_ref().unwrap().as_str(), "ACME");
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let db = test_db().await;
        let store = db.articles();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let original = article("https://n/rt", Some("ACME"), at);

        store.put(&original).await.unwrap();
        let loaded = store.get(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.title, original.title);
        assert_eq!(loaded.published_at, original.published_at);
        assert_eq!(
            loaded.sentiment.unwrap().polarity,
            original.sentiment.unwrap().polarity
        );
    }
}
