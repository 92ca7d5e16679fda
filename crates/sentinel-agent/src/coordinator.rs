use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alert_dispatcher::{
    AlertDispatcher, AudioChannel, Channel, ChannelError, DesktopChannel, DispatcherConfig,
    EmailChannel, TelegramChannel,
};
use chrono::Utc;
use market_data::{HttpPriceSource, PriceSourceConfig};
use news_aggregator::{JsonSocialSource, NewsAggregator, RssFeedSource};
use scanner_runtime::{
    CandidateTx, IntradayScanner, OpportunityScanner, PremarketScanner, ScanProfile,
    CANDIDATE_CHANNEL_CAPACITY,
};
use signal_core::{
    Alert, CandidateKind, IntervalTicker, MarketClock, MonthlyScore, NewsSource, PriceSource,
    Quota, RateLimiter, ScanKind, SignalError, SocialSource, Symbol, Watchlist,
};
use signal_store::SignalDb;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::SentinelConfig;

/// Which scanners `run` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    All,
    PremarketOnly,
    IntradayOnly,
    OpportunityOnly,
}

/// Graceful-shutdown drain budget.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the watchlist and every subsystem; the narrow API the CLI talks to.
pub struct Coordinator {
    config: SentinelConfig,
    profile: ScanProfile,
    db: SignalDb,
    clock: Arc<MarketClock>,
    watchlist: Arc<Watchlist>,
    price: Arc<dyn PriceSource>,
    dispatcher: Arc<AlertDispatcher>,
    premarket: Arc<PremarketScanner>,
    intraday: Arc<IntradayScanner>,
    opportunity: Arc<OpportunityScanner>,
    candidate_tx: CandidateTx,
    candidate_rx: Mutex<Option<mpsc::Receiver<signal_core::Candidate>>>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Coordinator {
    pub async fn new(config: SentinelConfig, aggressive: bool) -> Result<Self, SignalError> {
        let profile = config.scan_profile(aggressive);
        let db = SignalDb::connect(&config.database_url).await?;
        let clock = Arc::new(MarketClock::new(config.holidays.clone()));

        // Watchlist: env config merged with what survived the last run
        let mut symbols: Vec<Symbol> = Vec::new();
        for raw in &config.watchlist {
            symbols.push(Symbol::new(raw)?);
        }
        for raw in db.state().load_watchlist().await? {
            if let Ok(symbol) = Symbol::new(&raw) {
                if !symbols.contains(&symbol) {
                    symbols.push(symbol);
                }
            }
        }
        let watchlist = Arc::new(Watchlist::new(symbols.clone()));
        db.state()
            .save_watchlist(&symbols.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .await?;

        let rate_limiter = Arc::new(RateLimiter::new(Quota::per_minute(120.0)));

        let price_source = HttpPriceSource::new(
            PriceSourceConfig::new(config.price_api_url.clone(), config.price_api_key.clone()),
            Arc::clone(&rate_limiter),
        );
        price_source.register_quota().await;
        let price: Arc<dyn PriceSource> = Arc::new(price_source);

        let news_sources: Vec<Arc<dyn NewsSource>> = config
            .news_rss_feeds
            .iter()
            .map(|(name, url)| {
                Arc::new(RssFeedSource::new(name.clone(), url.clone())) as Arc<dyn NewsSource>
            })
            .collect();
        let social_sources: Vec<Arc<dyn SocialSource>> = config
            .social_feed_url
            .iter()
            .map(|url| {
                Arc::new(JsonSocialSource::new("social", url.clone())) as Arc<dyn SocialSource>
            })
            .collect();
        let aggregator = Arc::new(NewsAggregator::new(
            news_sources,
            social_sources,
            Arc::clone(&rate_limiter),
            symbols,
        ));
        aggregator.register_quotas(30.0).await;

        let dispatcher = Arc::new(AlertDispatcher::new(
            build_channels(&config),
            db.alerts(),
            DispatcherConfig {
                cooldown_s: [
                    (CandidateKind::PremarketCatalyst, config.cooldown_premarket_s),
                    (CandidateKind::IntradayPump, config.cooldown_intraday_s),
                    (CandidateKind::IntradayExit, config.cooldown_intraday_s),
                    (CandidateKind::Opportunity, config.cooldown_opportunity_s),
                ]
                .into_iter()
                .collect(),
                retry: Default::default(),
            },
        ));
        dispatcher.register_channel_quotas().await;

        let (candidate_tx, candidate_rx) = CandidateTx::channel(CANDIDATE_CHANNEL_CAPACITY);

        let premarket = Arc::new(PremarketScanner::new(
            Arc::clone(&aggregator),
            Arc::clone(&price),
            db.articles(),
            Arc::clone(&watchlist),
            Arc::clone(&clock),
            candidate_tx.clone(),
        ));
        let intraday = Arc::new(IntradayScanner::new(
            Arc::clone(&price),
            Arc::clone(&watchlist),
            Arc::clone(&clock),
            candidate_tx.clone(),
            profile.clone(),
        ));
        let opportunity = Arc::new(OpportunityScanner::new(
            Arc::clone(&price),
            db.articles(),
            db.bars(),
            db.scores(),
            Arc::clone(&watchlist),
            Arc::clone(&clock),
            candidate_tx.clone(),
            profile.clone(),
        ));

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            profile,
            db,
            clock,
            watchlist,
            price,
            dispatcher,
            premarket,
            intraday,
            opportunity,
            candidate_tx,
            candidate_rx: Mutex::new(Some(candidate_rx)),
            shutdown,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the dispatcher and the scanners selected by `mode`. Idempotent.
    pub async fn start(&self, mode: RunMode) -> Result<(), SignalError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Coordinator already started");
            return Ok(());
        }

        let mut handles = self.handles.lock().await;

        if let Some(rx) = self.candidate_rx.lock().await.take() {
            let dispatcher = Arc::clone(&self.dispatcher);
            handles.push(tokio::spawn(dispatcher.run(rx)));
        }

        if matches!(mode, RunMode::All | RunMode::PremarketOnly) {
            let scanner = Arc::clone(&self.premarket);
            let ticker = Box::new(IntervalTicker::new(Duration::from_secs(
                self.profile.premarket_interval_s,
            )));
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(scanner.run(ticker, shutdown)));
        }
        if matches!(mode, RunMode::All | RunMode::IntradayOnly) {
            let scanner = Arc::clone(&self.intraday);
            let ticker = Box::new(IntervalTicker::new(Duration::from_secs(
                self.profile.intraday_interval_s,
            )));
            handles.push(tokio::spawn(scanner.run(ticker, self.shutdown.subscribe())));
        }
        if matches!(mode, RunMode::All | RunMode::OpportunityOnly) {
            let scanner = Arc::clone(&self.opportunity);
            let ticker = Box::new(IntervalTicker::new(Duration::from_secs(
                self.config.opportunity_interval_s,
            )));
            handles.push(tokio::spawn(scanner.run(ticker, self.shutdown.subscribe())));
        }

        // Daily retention sweep
        {
            let db = self.db.clone();
            let days = self.config.retention_days;
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(24 * 3600));
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = interval.tick() => {
                            if let Err(e) = db.trim_retention(days).await {
                                tracing::warn!("Retention trim failed: {}", e);
                            }
                        }
                    }
                }
            }));
        }

        // Heartbeat
        {
            let premarket = Arc::clone(&self.premarket);
            let intraday = Arc::clone(&self.intraday);
            let opportunity = Arc::clone(&self.opportunity);
            let dispatcher = Arc::clone(&self.dispatcher);
            let clock = Arc::clone(&self.clock);
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(300));
                interval.tick().await; // skip the immediate first tick
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = interval.tick() => {
                            tracing::info!(
                                "Heartbeat | phase {} | premarket {} | intraday {} | opportunity {} | delivered {} deduped {}",
                                clock.phase(Utc::now()).as_str(),
                                premarket.metrics.snapshot(),
                                intraday.metrics.snapshot(),
                                opportunity.metrics.snapshot(),
                                dispatcher.delivered_count(),
                                dispatcher.deduplicated_count(),
                            );
                        }
                    }
                }
            }));
        }

        tracing::info!(
            "Coordinator started ({:?}, {} symbols, {} mode)",
            mode,
            self.watchlist.len(),
            if self.profile.aggressive { "aggressive" } else { "standard" }
        );
        Ok(())
    }

    /// Stop all workers with a bounded drain. Idempotent.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);

        let mut handles = self.handles.lock().await;
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        for handle in handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("Drain timeout; aborting worker");
                abort.abort();
            }
        }
        tracing::info!("Coordinator stopped");
    }

    /// Synchronous on-demand score; also persisted under the MONTHLY kind.
    pub async fn score(&self, symbol: &Symbol) -> Result<MonthlyScore, SignalError> {
        let score = self.opportunity.score_symbol(symbol, Utc::now()).await?;
        self.db.scores().put(&score, ScanKind::Monthly).await?;
        Ok(score)
    }

    /// One opportunity pass outside the scheduler; returns the candidates
    /// that passed the strict filter.
    pub async fn scan_once(&self) -> Result<Vec<signal_core::Candidate>, SignalError> {
        let (tx, mut rx) = CandidateTx::channel(CANDIDATE_CHANNEL_CAPACITY);
        let scanner = Arc::new(OpportunityScanner::new(
            Arc::clone(&self.price),
            self.db.articles(),
            self.db.bars(),
            self.db.scores(),
            Arc::clone(&self.watchlist),
            Arc::clone(&self.clock),
            tx,
            self.profile.clone(),
        ));
        scanner.tick_once(Utc::now()).await;

        let mut candidates = Vec::new();
        while let Ok(candidate) = rx.try_recv() {
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    pub async fn recent_alerts(
        &self,
        since: chrono::Duration,
    ) -> Result<Vec<Alert>, SignalError> {
        self.db.alerts().recent(Utc::now() - since).await
    }

    pub async fn ack_alert(&self, id: &str) -> Result<bool, SignalError> {
        self.db.alerts().ack(id, Utc::now()).await
    }

    pub fn add_symbol(&self, symbol: Symbol) {
        self.watchlist.add(symbol);
    }

    pub fn remove_symbol(&self, symbol: &Symbol) {
        self.watchlist.remove(symbol);
    }

    /// Persist the current watchlist snapshot.
    pub async fn save_watchlist(&self) -> Result<(), SignalError> {
        let snapshot = self.watchlist.snapshot();
        let mut symbols: Vec<String> = snapshot.symbols.iter().map(|s| s.to_string()).collect();
        symbols.sort();
        self.db.state().save_watchlist(&symbols).await
    }

    /// Component status map for the `health` subcommand.
    pub async fn health(&self) -> serde_json::Value {
        let database = match sqlx::query("SELECT 1").execute(self.db.pool()).await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        };

        serde_json::json!({
            "components": {
                "database": database,
                "market_clock": self.clock.phase(Utc::now()).as_str(),
                "watchlist": {
                    "symbols": self.watchlist.len(),
                    "version": self.watchlist.snapshot().version,
                },
                "premarket_scanner": {
                    "metrics": self.premarket.metrics.snapshot(),
                    "quarantined": self.premarket.health.quarantined_count(),
                },
                "intraday_scanner": {
                    "metrics": self.intraday.metrics.snapshot(),
                    "quarantined": self.intraday.health.quarantined_count(),
                    "open_candidates": self.intraday.open_candidate_count(),
                },
                "opportunity_scanner": {
                    "metrics": self.opportunity.metrics.snapshot(),
                    "quarantined": self.opportunity.health.quarantined_count(),
                },
                "dispatcher": {
                    "delivered": self.dispatcher.delivered_count(),
                    "deduplicated": self.dispatcher.deduplicated_count(),
                    "retries": self.dispatcher.retries_recorded(),
                    "disabled_channels": self.dispatcher.disabled_channels(),
                },
                "candidate_channel": {
                    "dropped": self.candidate_tx.dropped_count(),
                },
            }
        })
    }

    /// Startup connectivity checks: the database is load-bearing, the price
    /// source is warn-only.
    pub async fn startup_checks(&self) -> Result<(), SignalError> {
        sqlx::query("SELECT 1")
            .execute(self.db.pool())
            .await
            .map_err(|e| SignalError::Database(format!("database check failed: {}", e)))?;
        tracing::info!("Startup check: database OK");

        let probe = Symbol::new("SPY")?;
        match self
            .price
            .fetch_daily(&probe, Utc::now() - chrono::Duration::days(7), Utc::now())
            .await
        {
            Ok(_) => tracing::info!("Startup check: price source OK"),
            Err(e) => tracing::warn!(
                "Startup check: price source unreachable ({}) -- scans will retry",
                e
            ),
        }
        Ok(())
    }
}

/// Channel set in fallback order. A channel that cannot configure itself is
/// left out and logged with its reason.
fn build_channels(config: &SentinelConfig) -> Vec<Arc<dyn Channel>> {
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

    if config.telegram_enabled {
        match TelegramChannel::from_env() {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(ChannelError::Unconfigured(reason)) => {
                tracing::info!("Telegram channel disabled: {}", reason)
            }
            Err(e) => tracing::warn!("Telegram channel unavailable: {}", e),
        }
    }
    if config.email_enabled {
        match EmailChannel::from_env() {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(ChannelError::Unconfigured(reason)) => {
                tracing::info!("Email channel disabled: {}", reason)
            }
            Err(e) => tracing::warn!("Email channel unavailable: {}", e),
        }
    }
    if config.desktop_enabled {
        channels.push(Arc::new(DesktopChannel));
    }
    if config.audio_enabled {
        match AudioChannel::from_env() {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(ChannelError::Unconfigured(reason)) => {
                tracing::info!("Audio channel disabled: {}", reason)
            }
            Err(e) => tracing::warn!("Audio channel unavailable: {}", e),
        }
    }

    if channels.is_empty() {
        tracing::warn!("No alert channels configured; alerts will only be persisted");
    }
    channels
}
