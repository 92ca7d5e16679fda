use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use scoring_engine::ScoringEngine;
use signal_core::{
    Candidate, CandidateKind, CandidatePayload, MarketClock, MarketPhase, MonthlyScore,
    PriceSource, ScanKind, SignalError, Symbol, Ticker, Watchlist,
};
use signal_store::{ArticleStore, BarStore, ScoreStore};
use tokio::sync::{watch, Semaphore};

use crate::{CandidateTx, ScanProfile, ScannerMetrics, SymbolHealth};

/// Daily history window requested per symbol.
const HISTORY_DAYS: i64 = 320;
/// Article lookback feeding the sentiment component.
const ARTICLE_WINDOW_DAYS: i64 = 30;

/// Opportunity scanner: walks the watchlist universe through the scoring
/// engine in a bounded worker pool and emits only candidates passing the
/// strict multi-filter (score, risk/reward, component floors, volume,
/// volatility band).
pub struct OpportunityScanner {
    price: Arc<dyn PriceSource>,
    engine: Arc<ScoringEngine>,
    articles: ArticleStore,
    bars: BarStore,
    scores: ScoreStore,
    watchlist: Arc<Watchlist>,
    clock: Arc<MarketClock>,
    tx: CandidateTx,
    profile: ScanProfile,
    pub health: Arc<SymbolHealth>,
    pub metrics: Arc<ScannerMetrics>,
}

impl OpportunityScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        price: Arc<dyn PriceSource>,
        articles: ArticleStore,
        bars: BarStore,
        scores: ScoreStore,
        watchlist: Arc<Watchlist>,
        clock: Arc<MarketClock>,
        tx: CandidateTx,
        profile: ScanProfile,
    ) -> Self {
        Self {
            price,
            engine: Arc::new(ScoringEngine::new()),
            articles,
            bars,
            scores,
            watchlist,
            clock,
            tx,
            profile,
            health: Arc::new(SymbolHealth::new()),
            metrics: Arc::new(ScannerMetrics::new()),
        }
    }

    /// Cooperative loop: scheduled when the market is CLOSED or AFTERHOURS
    /// so it does not compete with the intraday scanner.
    pub async fn run(
        self: Arc<Self>,
        mut ticker: Box<dyn Ticker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Opportunity scanner started");
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
                    let phase = self.clock.phase(now);
                    if !matches!(phase, MarketPhase::Closed | MarketPhase::AfterHours) {
                        continue;
                    }
                    self.tick_once(now).await;
                }
            }
        }
        tracing::info!("Opportunity scanner stopped: {}", self.metrics.snapshot());
    }

    /// One full-universe pass at `now`.
    pub async fn tick_once(self: &Arc<Self>, now: DateTime<Utc>) {
        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.watchlist.snapshot();
        let mut symbols: Vec<Symbol> = snapshot.symbols.iter().cloned().collect();
        symbols.sort();

        let semaphore = Arc::new(Semaphore::new(self.profile.opportunity_pool_size));
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            if self.health.is_quarantined(&symbol) {
                continue;
            }
            let scanner = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                scanner.metrics.symbols_scanned.fetch_add(1, Ordering::Relaxed);
                match scanner.evaluate_symbol(&symbol, now).await {
                    Ok(Some(candidate)) => {
                        scanner.health.record_ok(&symbol);
                        scanner.metrics.candidates.fetch_add(1, Ordering::Relaxed);
                        scanner.tx.send(candidate).await;
                    }
                    Ok(None) => scanner.health.record_ok(&symbol),
                    Err(e) => {
                        scanner.metrics.errors.fetch_add(1, Ordering::Relaxed);
                        scanner.health.record_error(&symbol, e.kind());
                        tracing::debug!("Opportunity skip {}: {}", symbol, e);
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Score one symbol on demand, bypassing the filters (used by the
    /// coordinator's synchronous `Score`).
    pub async fn score_symbol(
        &self,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Result<MonthlyScore, SignalError> {
        let bars = self
            .price
            .fetch_daily(symbol, now - Duration::days(HISTORY_DAYS), now)
            .await?;
        let articles = self
            .articles
            .recent_for_symbol(symbol, now - Duration::days(ARTICLE_WINDOW_DAYS))
            .await?;
        self.engine.score(symbol, &bars, &articles, &[], now)
    }

    async fn evaluate_symbol(
        &self,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Result<Option<Candidate>, SignalError> {
        let bars = match self
            .price
            .fetch_daily(symbol, now - Duration::days(HISTORY_DAYS), now)
            .await
        {
            Ok(bars) => bars,
            // Off-hours gaps are a skip, not a failure
            Err(SignalError::Empty(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let articles = self
            .articles
            .recent_for_symbol(symbol, now - Duration::days(ARTICLE_WINDOW_DAYS))
            .await?;

        if let Err(e) = self.bars.put_series(&bars).await {
            tracing::warn!("Failed to persist daily bars for {}: {}", symbol, e);
        }

        let score = self.engine.score(symbol, &bars, &articles, &[], now)?;
        self.scores.put(&score, ScanKind::Opportunity).await?;

        if !self.passes_filters(&score, &bars) {
            return Ok(None);
        }

        Ok(Some(Candidate {
            symbol: symbol.clone(),
            kind: CandidateKind::Opportunity,
            score: score.total,
            reasons: score.reasons.clone(),
            detected_at: now,
            payload: CandidatePayload::Opportunity(Box::new(score)),
        }))
    }

    fn passes_filters(&self, score: &MonthlyScore, bars: &[signal_core::Bar]) -> bool {
        if score.total < self.profile.opportunity_min_score {
            return false;
        }
        let Some(rr) = score.risk_reward else {
            return false;
        };
        if rr < self.profile.opportunity_min_rr {
            return false;
        }

        let floor = self.profile.opportunity_min_component;
        let c = &score.components;
        if c.trend < floor
            || c.momentum < floor
            || c.sentiment < floor
            || c.divergence < floor
            || c.volume < floor
        {
            return false;
        }

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        if volumes.len() < 20 {
            return false;
        }
        let last5 = volumes[volumes.len() - 5..].iter().sum::<f64>() / 5.0;
        let last20 = volumes[volumes.len() - 20..].iter().sum::<f64>() / 20.0;
        if last20 <= 0.0 || last5 / last20 < self.profile.opportunity_min_volume_ratio {
            return false;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let Some(volatility) = technical_indicators::annualized_volatility(&closes) else {
            return false;
        };
        let (vol_min, vol_max) = self.profile.opportunity_volatility_range;
        (vol_min..=vol_max).contains(&volatility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::{ComponentScores, Conviction, Recommendation};

    fn profile() -> ScanProfile {
        ScanProfile::standard()
    }

    fn score_with(total: f64, rr: Option<f64>, component_floor: f64) -> MonthlyScore {
        MonthlyScore {
            symbol: Symbol::new("ACME").unwrap(),
            as_of: Utc::now(),
            total,
            components: ComponentScores {
                trend: component_floor,
                momentum: component_floor,
                sentiment: component_floor,
                divergence: component_floor,
                volume: component_floor,
            },
            recommendation: Recommendation::from_total(total),
            conviction: Conviction::from_total(total),
            entry: Some(100.0),
            stop: Some(92.0),
            target: Some(120.0),
            risk_reward: rr,
            confidence: 0.9,
            reasons: vec![],
        }
    }

    fn bars_with(volume_tail: f64, choppy: bool) -> Vec<signal_core::Bar> {
        let symbol = Symbol::new("ACME").unwrap();
        let start = Utc::now() - Duration::days(260);
        (0..250)
            .map(|i| {
                let wiggle = if choppy {
                    if i % 2 == 0 { -2.0 } else { 2.0 }
                } else {
                    0.0
                };
                let close = 100.0 + wiggle;
                let volume = if i >= 245 { volume_tail } else { 1_000_000.0 };
                signal_core::Bar {
                    symbol: symbol.clone(),
                    ts: start + Duration::days(i),
                    open: close,
                    high: close + 2.5,
                    low: close - 2.5,
                    close,
                    volume,
                }
            })
            .collect()
    }

    struct NoPrices;

    #[async_trait::async_trait]
    impl PriceSource for NoPrices {
        async fn fetch_daily(
            &self,
            _s: &Symbol,
            _f: DateTime<Utc>,
            _t: DateTime<Utc>,
        ) -> Result<Vec<signal_core::Bar>, SignalError> {
            Err(SignalError::Empty("unused".to_string()))
        }

        async fn fetch_intraday(
            &self,
            _s: &Symbol,
            _f: DateTime<Utc>,
            _t: DateTime<Utc>,
        ) -> Result<Vec<signal_core::Bar>, SignalError> {
            Err(SignalError::Empty("unused".to_string()))
        }
    }

    async fn scanner() -> OpportunityScanner {
        let db = signal_store::SignalDb::connect("sqlite::memory:")
            .await
            .unwrap();
        let (tx, _rx) = CandidateTx::channel(8);
        OpportunityScanner::new(
            Arc::new(NoPrices),
            db.articles(),
            db.bars(),
            db.scores(),
            Arc::new(Watchlist::default()),
            Arc::new(MarketClock::default()),
            tx,
            profile(),
        )
    }

    #[tokio::test]
    async fn test_passing_score_clears_every_gate() {
        let s = scanner().await;
        let score = score_with(88.0, Some(2.6), 75.0);
        let bars = bars_with(1_500_000.0, true);
        assert!(s.passes_filters(&score, &bars));
    }

    #[tokio::test]
    async fn test_total_and_rr_gates() {
        let s = scanner().await;
        let bars = bars_with(1_500_000.0, true);

        assert!(!s.passes_filters(&score_with(84.0, Some(2.6), 75.0), &bars));
        assert!(!s.passes_filters(&score_with(88.0, Some(2.4), 75.0), &bars));
        assert!(!s.passes_filters(&score_with(88.0, None, 75.0), &bars));
    }

    #[tokio::test]
    async fn test_component_floor_gate() {
        let s = scanner().await;
        let bars = bars_with(1_500_000.0, true);
        let mut score = score_with(88.0, Some(2.6), 75.0);
        score.components.divergence = 65.0;
        assert!(!s.passes_filters(&score, &bars));
    }

    #[tokio::test]
    async fn test_volume_ratio_gate() {
        let s = scanner().await;
        let score = score_with(88.0, Some(2.6), 75.0);
        // Flat tail volume: ratio ~1.0, below the 1.3 floor
        let bars = bars_with(1_000_000.0, true);
        assert!(!s.passes_filters(&score, &bars));
    }

    #[tokio::test]
    async fn test_volatility_band_gate() {
        let s = scanner().await;
        let score = score_with(88.0, Some(2.6), 75.0);
        // Constant closes: annualized volatility ~0%, outside [15, 80]
        let bars = bars_with(1_500_000.0, false);
        assert!(!s.passes_filters(&score, &bars));
    }
}
