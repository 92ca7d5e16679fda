use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use news_aggregator::NewsAggregator;
use signal_core::{
    Article, Candidate, CandidateKind, CandidatePayload, CatalystPriority, MarketClock,
    MarketPhase, PriceSource, SignalError, Symbol, Ticker, Watchlist,
};
use signal_store::ArticleStore;
use tokio::sync::{watch, Mutex};

use crate::{CandidateTx, ScannerMetrics, SymbolHealth};

/// Emit when premarket volume runs at or above this multiple of the
/// pro-rated 30-day average, regardless of catalyst tier.
const VOLUME_RATIO_TRIGGER: f64 = 3.0;

// ET premarket session boundaries, minutes since midnight.
const PREMARKET_OPEN_MIN: i64 = 4 * 60;
const REGULAR_SESSION_MIN: f64 = 390.0;

/// Premarket catalyst scanner: per tick, pulls the news delta, tags and
/// persists it, and emits a candidate for every catalyst-tagged article with
/// a resolvable watchlist symbol whose premarket volume confirms (or whose
/// catalyst is CRITICAL on its own).
pub struct PremarketScanner {
    aggregator: Arc<NewsAggregator>,
    price: Arc<dyn PriceSource>,
    articles: ArticleStore,
    watchlist: Arc<Watchlist>,
    clock: Arc<MarketClock>,
    tx: CandidateTx,
    pub health: Arc<SymbolHealth>,
    pub metrics: Arc<ScannerMetrics>,
    last_fetch: Mutex<DateTime<Utc>>,
}

impl PremarketScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aggregator: Arc<NewsAggregator>,
        price: Arc<dyn PriceSource>,
        articles: ArticleStore,
        watchlist: Arc<Watchlist>,
        clock: Arc<MarketClock>,
        tx: CandidateTx,
    ) -> Self {
        Self {
            aggregator,
            price,
            articles,
            watchlist,
            clock,
            tx,
            health: Arc::new(SymbolHealth::new()),
            metrics: Arc::new(ScannerMetrics::new()),
            last_fetch: Mutex::new(Utc::now() - Duration::hours(12)),
        }
    }

    /// Cooperative loop gated on the PREMARKET phase.
    pub async fn run(
        self: Arc<Self>,
        mut ticker: Box<dyn Ticker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Premarket scanner started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                more = ticker.tick() => {
                    if !more {
                        break;
                    }
                    let now = Utc::now();
                    if self.clock.phase(now) != MarketPhase::Premarket {
                        continue;
                    }
                    self.tick_once(now).await;
                }
            }
        }
        tracing::info!(
            "Premarket scanner stopped: {}",
            self.metrics.snapshot()
        );
    }

    /// One premarket pass at `now`.
    pub async fn tick_once(&self, now: DateTime<Utc>) {
        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);

        let since = {
            let mut last = self.last_fetch.lock().await;
            let since = *last;
            *last = now;
            since
        };

        let result = self.aggregator.fetch(since).await;
        let mut fresh = 0usize;
        for article in &result.articles {
            match self.articles.put(article).await {
                Ok(true) => fresh += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to persist article {}: {}", article.id, e),
            }
        }
        tracing::debug!(
            "Premarket tick: {} articles ({} new) from {} sources",
            result.articles.len(),
            fresh,
            result.statuses.len()
        );

        let snapshot = self.watchlist.snapshot();
        for article in &result.articles {
            let Some(priority) = article.catalyst_priority() else {
                continue;
            };
            let Some(symbol) = article.symbol.clone() else {
                continue;
            };
            if !snapshot.contains(&symbol) || self.health.is_quarantined(&symbol) {
                continue;
            }

            match self.evaluate(&symbol, article, priority, now).await {
                Ok(Some(candidate)) => {
                    self.health.record_ok(&symbol);
                    self.metrics.candidates.fetch_add(1, Ordering::Relaxed);
                    self.tx.send(candidate).await;
                }
                Ok(None) => self.health.record_ok(&symbol),
                Err(e) => {
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    self.health.record_error(&symbol, e.kind());
                    tracing::debug!("Premarket skip {}: {}", symbol, e);
                }
            }
        }
    }

    async fn evaluate(
        &self,
        symbol: &Symbol,
        article: &Article,
        priority: CatalystPriority,
        now: DateTime<Utc>,
    ) -> Result<Option<Candidate>, SignalError> {
        self.metrics.symbols_scanned.fetch_add(1, Ordering::Relaxed);

        let volume_ratio = self.premarket_volume_ratio(symbol, now).await?;
        if volume_ratio < VOLUME_RATIO_TRIGGER && priority != CatalystPriority::Critical {
            return Ok(None);
        }

        let sentiment = article.sentiment.map(|s| s.polarity).unwrap_or(0.0);
        let score = (60.0
            + 20.0 * (1.0 + volume_ratio).log10()
            + 10.0 * priority.rank() as f64
            + sentiment * 10.0)
            .min(100.0);

        let tags = article
            .catalyst_tags
            .iter()
            .map(|t| t.keyword.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut reasons = vec![format!("catalyst: {}", tags)];
        if volume_ratio >= VOLUME_RATIO_TRIGGER {
            reasons.push(format!("premarket volume {:.1}x average", volume_ratio));
        }

        Ok(Some(Candidate {
            symbol: symbol.clone(),
            kind: CandidateKind::PremarketCatalyst,
            score,
            reasons,
            detected_at: now,
            payload: CandidatePayload::Premarket {
                catalyst: priority,
                headline: article.title.clone(),
                volume_ratio,
                sentiment,
            },
        }))
    }

    /// Premarket volume vs the pro-rated 30-day average. Missing intraday
    /// data during the thin premarket session is not an error; it reads as a
    /// zero ratio.
    async fn premarket_volume_ratio(
        &self,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Result<f64, SignalError> {
        let et = now.with_timezone(&New_York);
        let session_open = et
            .date_naive()
            .and_hms_opt(4, 0, 0)
            .and_then(|naive| {
                New_York
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .unwrap_or(now);

        let premarket_volume: f64 = match self.price.fetch_intraday(symbol, session_open, now).await
        {
            Ok(bars) => bars.iter().map(|b| b.volume).sum(),
            Err(SignalError::Empty(_)) => 0.0,
            Err(e) => return Err(e),
        };

        let daily = match self
            .price
            .fetch_daily(symbol, now - Duration::days(45), now)
            .await
        {
            Ok(bars) => bars,
            Err(SignalError::Empty(_)) => return Ok(0.0),
            Err(e) => return Err(e),
        };
        let recent: Vec<f64> = daily
            .iter()
            .rev()
            .take(30)
            .map(|b| b.volume)
            .collect();
        if recent.is_empty() {
            return Ok(0.0);
        }
        let avg_daily = recent.iter().sum::<f64>() / recent.len() as f64;
        if avg_daily <= 0.0 {
            return Ok(0.0);
        }

        // Pro-rate the daily average by elapsed premarket minutes so an
        // early-session spike still registers.
        let elapsed_min = ((et.hour() as i64 * 60 + et.minute() as i64) - PREMARKET_OPEN_MIN)
            .max(1) as f64;
        let expected = avg_daily * (elapsed_min / REGULAR_SESSION_MIN);
        Ok(premarket_volume / expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use news_aggregator::RssFeedSource;
    use signal_core::{Bar, NewsSource, Quota, RateLimiter};
    use signal_store::SignalDb;

    /// Static price source: configurable premarket volume and daily average.
    struct StubPriceSource {
        premarket_volume_per_bar: f64,
        daily_volume: f64,
    }

    #[async_trait]
    impl PriceSource for StubPriceSource {
        async fn fetch_daily(
            &self,
            symbol: &Symbol,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Bar>, SignalError> {
            let days = (to - from).num_days().clamp(1, 40);
            Ok((0..days)
                .map(|i| Bar {
                    symbol: symbol.clone(),
                    ts: from + Duration::days(i),
                    open: 10.0,
                    high: 11.0,
                    low: 9.0,
                    close: 10.5,
                    volume: self.daily_volume,
                })
                .collect())
        }

        async fn fetch_intraday(
            &self,
            symbol: &Symbol,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Bar>, SignalError> {
            let minutes = (to - from).num_minutes().clamp(0, 400);
            if self.premarket_volume_per_bar <= 0.0 {
                return Err(SignalError::Empty("no premarket bars".to_string()));
            }
            Ok((0..minutes)
                .map(|i| Bar {
                    symbol: symbol.clone(),
                    ts: from + Duration::minutes(i),
                    open: 10.0,
                    high: 10.2,
                    low: 9.9,
                    close: 10.1,
                    volume: self.premarket_volume_per_bar,
                })
                .collect())
        }
    }

    async fn scanner(
        price: StubPriceSource,
    ) -> (Arc<PremarketScanner>, tokio::sync::mpsc::Receiver<Candidate>) {
        let db = SignalDb::connect("sqlite::memory:").await.unwrap();
        let limiter = Arc::new(RateLimiter::new(Quota::per_minute(600.0)));
        let universe = ["ACME"].iter().map(|s| Symbol::new(s).unwrap());
        let aggregator = Arc::new(NewsAggregator::new(
            vec![Arc::new(RssFeedSource::new("unused", "http://127.0.0.1:1/feed"))
                as Arc<dyn NewsSource>],
            vec![],
            limiter,
            universe,
        ));
        let watchlist = Arc::new(Watchlist::new([Symbol::new("ACME").unwrap()]));
        let (tx, rx) = CandidateTx::channel(16);
        let scanner = Arc::new(PremarketScanner::new(
            aggregator,
            Arc::new(price),
            db.articles(),
            watchlist,
            Arc::new(MarketClock::default()),
            tx,
        ));
        (scanner, rx)
    }

    fn fda_article(now: DateTime<Utc>) -> Article {
        let mut article = Article {
            id: Article::compute_id(Some("https://n/fda"), "feed", "t", now),
            symbol: Some(Symbol::new("ACME").unwrap()),
            title: "ACME receives FDA approval".to_string(),
            body: "approval granted".to_string(),
            source: "feed".to_string(),
            url: Some("https://n/fda".to_string()),
            published_at: now,
            fetched_at: now,
            sentiment: Some(signal_core::SentimentScore::new(0.6, 0.5)),
            catalyst_tags: vec![],
        };
        article.catalyst_tags = news_aggregator::catalyst::tag_catalysts(
            &article.title,
            &article.body,
        );
        article
    }

    #[tokio::test]
    async fn test_critical_catalyst_with_volume_spike() {
        // 06:15 ET: 135 elapsed premarket minutes. Daily average 390k means
        // the pro-rated expectation is 135k; 4.2x that is 567k premarket
        // volume, ~4.2k per minute bar.
        let now = New_York
            .with_ymd_and_hms(2025, 6, 2, 6, 15, 0)
            .unwrap()
            .with_timezone(&Utc);
        let (scanner, mut rx) = scanner(StubPriceSource {
            premarket_volume_per_bar: 4_200.0,
            daily_volume: 390_000.0,
        })
        .await;

        let article = fda_article(now);
        let candidate = scanner
            .evaluate(
                &Symbol::new("ACME").unwrap(),
                &article,
                CatalystPriority::Critical,
                now,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(candidate.kind, CandidateKind::PremarketCatalyst);
        // 60 + 20*log10(1+4.2) + 10*3 + 0.6*10 saturates at the 100 cap
        assert!((candidate.score - 100.0).abs() < 1e-9);
        match &candidate.payload {
            CandidatePayload::Premarket { volume_ratio, catalyst, .. } => {
                assert!((*volume_ratio - 4.2).abs() < 0.2);
                assert_eq!(*catalyst, CatalystPriority::Critical);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(candidate.priority(), signal_core::AlertPriority::Critical);
        let _ = rx.try_recv();
    }

    #[tokio::test]
    async fn test_medium_catalyst_without_volume_is_skipped() {
        let now = New_York
            .with_ymd_and_hms(2025, 6, 2, 6, 15, 0)
            .unwrap()
            .with_timezone(&Utc);
        let (scanner, _rx) = scanner(StubPriceSource {
            premarket_volume_per_bar: 100.0,
            daily_volume: 390_000.0,
        })
        .await;

        let article = fda_article(now);
        let result = scanner
            .evaluate(
                &Symbol::new("ACME").unwrap(),
                &article,
                CatalystPriority::Medium,
                now,
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_critical_fires_even_without_premarket_bars() {
        let now = New_York
            .with_ymd_and_hms(2025, 6, 2, 5, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let (scanner, _rx) = scanner(StubPriceSource {
            premarket_volume_per_bar: 0.0, // intraday fetch returns EMPTY
            daily_volume: 390_000.0,
        })
        .await;

        let article = fda_article(now);
        let candidate = scanner
            .evaluate(
                &Symbol::new("ACME").unwrap(),
                &article,
                CatalystPriority::Critical,
                now,
            )
            .await
            .unwrap()
            .unwrap();
        match &candidate.payload {
            CandidatePayload::Premarket { volume_ratio, .. } => {
                assert_eq!(*volume_ratio, 0.0)
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
