use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentiment_engine::SentimentEngine;
use signal_core::{
    Article, NewsSource, Quota, RateLimiter, SignalError, SocialPost, SocialSource, Symbol,
};
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub mod catalyst;
pub mod sources;
pub mod symbols;

pub use sources::{JsonNewsSource, JsonSocialSource, RssFeedSource};
pub use symbols::SymbolExtractor;

const PER_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);
const FANOUT_DEADLINE: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_FETCHES: usize = 10;

/// Outcome of one source in an aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Ok { articles: usize },
    Failed { kind: &'static str },
}

/// Result of a fan-out pass: merged articles plus per-source status.
#[derive(Debug, Default)]
pub struct AggregationResult {
    pub articles: Vec<Article>,
    pub posts: Vec<SocialPost>,
    pub statuses: HashMap<String, SourceStatus>,
}

/// Fan-out news/social fetcher. Each source runs behind the shared rate
/// limiter with its own timeout; failures are isolated and reported in the
/// status map. Articles merge by id, and an enrichment pass fills symbol,
/// catalyst tags and sentiment.
pub struct NewsAggregator {
    news_sources: Vec<Arc<dyn NewsSource>>,
    social_sources: Vec<Arc<dyn SocialSource>>,
    rate_limiter: Arc<RateLimiter>,
    sentiment: Arc<SentimentEngine>,
    extractor: Arc<SymbolExtractor>,
}

impl NewsAggregator {
    pub fn new(
        news_sources: Vec<Arc<dyn NewsSource>>,
        social_sources: Vec<Arc<dyn SocialSource>>,
        rate_limiter: Arc<RateLimiter>,
        ticker_universe: impl IntoIterator<Item = Symbol>,
    ) -> Self {
        Self {
            news_sources,
            social_sources,
            rate_limiter,
            sentiment: Arc::new(SentimentEngine::new()),
            extractor: Arc::new(SymbolExtractor::new(ticker_universe)),
        }
    }

    /// Register a per-minute quota for each configured source.
    pub async fn register_quotas(&self, requests_per_minute: f64) {
        for source in &self.news_sources {
            self.rate_limiter
                .register(source.name(), Quota::per_minute(requests_per_minute))
                .await;
        }
        for source in &self.social_sources {
            self.rate_limiter
                .register(source.name(), Quota::per_minute(requests_per_minute))
                .await;
        }
    }

    /// One aggregation pass over every configured source.
    pub async fn fetch(&self, since: DateTime<Utc>) -> AggregationResult {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let deadline = Instant::now() + FANOUT_DEADLINE;

        let mut news_handles = Vec::new();
        for source in &self.news_sources {
            let source = Arc::clone(source);
            let limiter = Arc::clone(&self.rate_limiter);
            let semaphore = Arc::clone(&semaphore);
            news_handles.push(tokio::spawn(async move {
                let name = source.name().to_string();
                let result = fetch_one(
                    &name,
                    limiter,
                    semaphore,
                    deadline,
                    source.fetch(since),
                )
                .await;
                (name, result)
            }));
        }

        let mut social_handles = Vec::new();
        for source in &self.social_sources {
            let source = Arc::clone(source);
            let limiter = Arc::clone(&self.rate_limiter);
            let semaphore = Arc::clone(&semaphore);
            social_handles.push(tokio::spawn(async move {
                let name = source.name().to_string();
                let result = fetch_one(
                    &name,
                    limiter,
                    semaphore,
                    deadline,
                    source.fetch(since),
                )
                .await;
                (name, result)
            }));
        }

        let mut result = AggregationResult::default();
        let mut merged: HashMap<String, Article> = HashMap::new();

        for handle in news_handles {
            let Ok((name, outcome)) = handle.await else {
                continue;
            };
            match outcome {
                Ok(articles) => {
                    result
                        .statuses
                        .insert(name, SourceStatus::Ok { articles: articles.len() });
                    for article in articles {
                        merge_article(&mut merged, article);
                    }
                }
                Err(e) => {
                    tracing::warn!("News source {} failed: {}", name, e);
                    result
                        .statuses
                        .insert(name, SourceStatus::Failed { kind: e.kind() });
                }
            }
        }

        for handle in social_handles {
            let Ok((name, outcome)) = handle.await else {
                continue;
            };
            match outcome {
                Ok(posts) => {
                    result
                        .statuses
                        .insert(name, SourceStatus::Ok { articles: posts.len() });
                    result.posts.extend(posts);
                }
                Err(e) => {
                    tracing::warn!("Social source {} failed: {}", name, e);
                    result
                        .statuses
                        .insert(name, SourceStatus::Failed { kind: e.kind() });
                }
            }
        }

        let mut articles: Vec<Article> = merged.into_values().collect();
        for article in &mut articles {
            self.enrich(article);
        }
        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        result.articles = articles;
        result
    }

    /// Fill symbol, catalyst tags and sentiment on a merged article.
    pub fn enrich(&self, article: &mut Article) {
        if article.symbol.is_none() {
            article.symbol = self.extractor.extract(&article.title, &article.body);
        }
        if article.catalyst_tags.is_empty() {
            article.catalyst_tags = catalyst::tag_catalysts(&article.title, &article.body);
        }
        if article.sentiment.is_none() {
            let text = format!("{}\n{}", article.title, article.body);
            article.sentiment = Some(self.sentiment.score(&text));
        }
    }

    pub fn sentiment_engine(&self) -> Arc<SentimentEngine> {
        Arc::clone(&self.sentiment)
    }
}

async fn fetch_one<T>(
    name: &str,
    limiter: Arc<RateLimiter>,
    semaphore: Arc<Semaphore>,
    deadline: Instant,
    fetch: impl std::future::Future<Output = Result<Vec<T>, SignalError>>,
) -> Result<Vec<T>, SignalError> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| SignalError::Cancelled("fetch pool closed".to_string()))?;
    limiter.acquire_until(name, deadline).await?;

    match tokio::time::timeout(PER_SOURCE_TIMEOUT, fetch).await {
        Ok(result) => result,
        Err(_) => Err(SignalError::Network(format!(
            "{} timed out after {:?}",
            name, PER_SOURCE_TIMEOUT
        ))),
    }
}

/// Deterministic merge: latest `fetched_at` wins on conflicting fields, the
/// source set accumulates, the first resolved symbol sticks.
fn merge_article(merged: &mut HashMap<String, Article>, incoming: Article) {
    match merged.remove(&incoming.id) {
        None => {
            merged.insert(incoming.id.clone(), incoming);
        }
        Some(existing) => {
            let (mut winner, loser) = if incoming.fetched_at >= existing.fetched_at {
                (incoming, existing)
            } else {
                (existing, incoming)
            };
            if winner.symbol.is_none() {
                winner.symbol = loser.symbol;
            }
            for source in loser.source.split(',') {
                let source = source.trim();
                if !source.is_empty() && !winner.source.split(',').any(|s| s.trim() == source) {
                    winner.source.push(',');
                    winner.source.push_str(source);
                }
            }
            for tag in loser.catalyst_tags {
                if !winner.catalyst_tags.contains(&tag) {
                    winner.catalyst_tags.push(tag);
                }
            }
            merged.insert(winner.id.clone(), winner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        name: String,
        articles: Vec<Article>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NewsSource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<Article>, SignalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.articles.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl NewsSource for FailingSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<Article>, SignalError> {
            Err(SignalError::Network("connection refused".to_string()))
        }
    }

    fn article(source: &str, url: &str, title: &str, fetched_at: DateTime<Utc>) -> Article {
        let published_at = Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap();
        Article {
            id: Article::compute_id(Some(url), source, title, published_at),
            symbol: None,
            title: title.to_string(),
            body: String::new(),
            source: source.to_string(),
            url: Some(url.to_string()),
            published_at,
            fetched_at,
            sentiment: None,
            catalyst_tags: Vec::new(),
        }
    }

    fn aggregator(sources: Vec<Arc<dyn NewsSource>>) -> NewsAggregator {
        let limiter = Arc::new(RateLimiter::new(Quota::per_minute(600.0)));
        let universe = ["ACME", "TSLA"].iter().map(|s| Symbol::new(s).unwrap());
        NewsAggregator::new(sources, vec![], limiter, universe)
    }

    #[tokio::test]
    async fn test_failed_source_is_isolated() {
        let now = Utc::now();
        let good = Arc::new(StaticSource {
            name: "good".to_string(),
            articles: vec![article("good", "https://n/1", "ACME receives FDA approval", now)],
            calls: AtomicUsize::new(0),
        });
        let agg = aggregator(vec![good, Arc::new(FailingSource)]);

        let result = agg.fetch(now - ChronoDuration::hours(1)).await;
        assert_eq!(result.articles.len(), 1);
        assert_eq!(
            result.statuses.get("good"),
            Some(&SourceStatus::Ok { articles: 1 })
        );
        assert_eq!(
            result.statuses.get("broken"),
            Some(&SourceStatus::Failed { kind: "NETWORK" })
        );
    }

    #[tokio::test]
    async fn test_same_id_merges_with_source_union() {
        let now = Utc::now();
        let early = article("feed-a", "https://n/same", "Megacorp merger talks", now);
        let late = article(
            "feed-b",
            "https://n/same",
            "Megacorp merger talks",
            now + ChronoDuration::seconds(5),
        );
        assert_eq!(early.id, late.id);

        let a = Arc::new(StaticSource {
            name: "feed-a".to_string(),
            articles: vec![early],
            calls: AtomicUsize::new(0),
        });
        let b = Arc::new(StaticSource {
            name: "feed-b".to_string(),
            articles: vec![late],
            calls: AtomicUsize::new(0),
        });

        let agg = aggregator(vec![a, b]);
        let result = agg.fetch(now - ChronoDuration::hours(1)).await;

        assert_eq!(result.articles.len(), 1);
        let merged = &result.articles[0];
        // Latest fetch wins the row, both sources are recorded
        assert!(merged.source.contains("feed-a"));
        assert!(merged.source.contains("feed-b"));
    }

    #[tokio::test]
    async fn test_refetch_produces_no_new_rows() {
        let now = Utc::now();
        let source = Arc::new(StaticSource {
            name: "feed".to_string(),
            articles: vec![article("feed", "https://n/1", "ACME earnings beat", now)],
            calls: AtomicUsize::new(0),
        });
        let agg = aggregator(vec![Arc::clone(&source) as Arc<dyn NewsSource>]);

        let first = agg.fetch(now - ChronoDuration::hours(1)).await;
        let second = agg.fetch(now - ChronoDuration::hours(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // Identical upstream data: identical ids, so a store upsert adds nothing
        assert_eq!(first.articles.len(), 1);
        assert_eq!(second.articles.len(), 1);
        assert_eq!(first.articles[0].id, second.articles[0].id);
    }

    #[tokio::test]
    async fn test_enrichment_fills_symbol_catalyst_sentiment() {
        let now = Utc::now();
        let source = Arc::new(StaticSource {
            name: "feed".to_string(),
            articles: vec![article(
                "feed",
                "https://n/fda",
                "ACME receives FDA approval",
                now,
            )],
            calls: AtomicUsize::new(0),
        });
        let agg = aggregator(vec![source]);

        let result = agg.fetch(now - ChronoDuration::hours(1)).await;
        let enriched = &result.articles[0];
        assert_eq!(enriched.symbol.as_ref().unwrap().as_str(), "ACME");
        assert_eq!(
            enriched.catalyst_priority().unwrap().as_str(),
            "CRITICAL"
        );
        assert!(enriched.sentiment.is_some());
    }
}
