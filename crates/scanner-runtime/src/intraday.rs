use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::America::New_York;
use dashmap::DashMap;
use signal_core::{
    Bar, BucketTag, Candidate, CandidateKind, CandidatePayload, MarketClock, MarketPhase,
    PriceSource, SignalError, Symbol, Ticker, Watchlist,
};
use tokio::sync::watch;

use crate::{CandidateTx, ScanProfile, ScannerMetrics, SymbolHealth};

/// Minute-bar lookback per evaluation.
const LOOKBACK_MINUTES: i64 = 60;
/// No new entries at or after this ET minute; open candidates exit.
const SESSION_CUTOFF_MIN: u32 = 15 * 60 + 45;
/// Opening range is the first five minutes of the regular session.
const OPENING_RANGE_END_MIN: u32 = 9 * 60 + 35;

/// An intraday setup match before scoring.
#[derive(Debug, Clone)]
struct SetupHit {
    name: &'static str,
    base_score: f64,
    long: bool,
}

/// Position state for the end-of-session exit rule.
#[derive(Debug, Clone)]
struct OpenCandidate {
    entry: f64,
    detected_at: DateTime<Utc>,
}

/// Intraday pump scanner: five setups over the last hour of minute bars,
/// per-symbol cooldown, a global concurrent-position cap and a hard
/// end-of-session exit at 15:45 ET.
pub struct IntradayScanner {
    price: Arc<dyn PriceSource>,
    watchlist: Arc<Watchlist>,
    clock: Arc<MarketClock>,
    tx: CandidateTx,
    profile: ScanProfile,
    pub health: Arc<SymbolHealth>,
    pub metrics: Arc<ScannerMetrics>,
    cooldowns: DashMap<Symbol, DateTime<Utc>>,
    open_candidates: DashMap<Symbol, OpenCandidate>,
}

impl IntradayScanner {
    pub fn new(
        price: Arc<dyn PriceSource>,
        watchlist: Arc<Watchlist>,
        clock: Arc<MarketClock>,
        tx: CandidateTx,
        profile: ScanProfile,
    ) -> Self {
        Self {
            price,
            watchlist,
            clock,
            tx,
            profile,
            health: Arc::new(SymbolHealth::new()),
            metrics: Arc::new(ScannerMetrics::new()),
            cooldowns: DashMap::new(),
            open_candidates: DashMap::new(),
        }
    }

    /// Cooperative loop gated on the REGULAR phase.
    pub async fn run(
        self: Arc<Self>,
        mut ticker: Box<dyn Ticker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            "Intraday scanner started ({} mode)",
            if self.profile.aggressive { "aggressive" } else { "standard" }
        );
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
                    if self.clock.phase(now) != MarketPhase::Regular {
                        continue;
                    }
                    self.tick_once(now).await;
                }
            }
        }
        tracing::info!("Intraday scanner stopped: {}", self.metrics.snapshot());
    }

    /// One intraday pass at `now`.
    pub async fn tick_once(&self, now: DateTime<Utc>) {
        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);

        let et = now.with_timezone(&New_York);
        let et_minutes = et.hour() * 60 + et.minute();
        if et_minutes >= SESSION_CUTOFF_MIN {
            self.close_session(now).await;
            return;
        }

        let snapshot = self.watchlist.snapshot();
        for symbol in snapshot.bucket(BucketTag::Intraday) {
            if self.health.is_quarantined(&symbol) {
                continue;
            }
            if self.in_cooldown(&symbol, now) {
                continue;
            }
            if self.open_candidates.len() >= self.profile.intraday_max_positions
                && !self.open_candidates.contains_key(&symbol)
            {
                continue;
            }

            match self.evaluate_symbol(&symbol, now).await {
                Ok(Some(candidate)) => {
                    self.health.record_ok(&symbol);
                    self.metrics.candidates.fetch_add(1, Ordering::Relaxed);
                    if let CandidatePayload::Intraday { entry, .. } = &candidate.payload {
                        self.open_candidates.insert(
                            symbol.clone(),
                            OpenCandidate {
                                entry: *entry,
                                detected_at: now,
                            },
                        );
                    }
                    self.cooldowns.insert(
                        symbol.clone(),
                        now + Duration::seconds(self.profile.intraday_cooldown_s),
                    );
                    self.tx.send(candidate).await;
                }
                Ok(None) => self.health.record_ok(&symbol),
                Err(e) => {
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    self.health.record_error(&symbol, e.kind());
                    tracing::debug!("Intraday skip {}: {}", symbol, e);
                }
            }
        }
    }

    /// 15:45 ET rule: every open candidate emits an EXIT, nothing new opens.
    async fn close_session(&self, now: DateTime<Utc>) {
        let open: Vec<(Symbol, OpenCandidate)> = self
            .open_candidates
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (symbol, position) in open {
            let last_price = match self
                .price
                .fetch_intraday(&symbol, now - Duration::minutes(5), now)
                .await
            {
                Ok(bars) => bars.last().map(|b| b.close).unwrap_or(position.entry),
                Err(_) => position.entry,
            };

            self.open_candidates.remove(&symbol);
            self.metrics.candidates.fetch_add(1, Ordering::Relaxed);
            self.tx
                .send(Candidate {
                    symbol: symbol.clone(),
                    kind: CandidateKind::IntradayExit,
                    score: 0.0,
                    reasons: vec!["session close at 15:45 ET".to_string()],
                    detected_at: now,
                    payload: CandidatePayload::Exit {
                        entry: position.entry,
                        last_price,
                        reason: format!(
                            "end of session (entered {})",
                            position.detected_at.to_rfc3339()
                        ),
                    },
                })
                .await;
        }
    }

    fn in_cooldown(&self, symbol: &Symbol, now: DateTime<Utc>) -> bool {
        self.cooldowns
            .get(symbol)
            .map(|until| now < *until)
            .unwrap_or(false)
    }

    async fn evaluate_symbol(
        &self,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Result<Option<Candidate>, SignalError> {
        self.metrics.symbols_scanned.fetch_add(1, Ordering::Relaxed);

        let bars = match self
            .price
            .fetch_intraday(symbol, now - Duration::minutes(LOOKBACK_MINUTES), now)
            .await
        {
            Ok(bars) => bars,
            // Thin tape is a skip, not a failure
            Err(SignalError::Empty(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(self.evaluate_bars(symbol, &bars, now))
    }

    /// Pure setup evaluation over the minute series.
    fn evaluate_bars(
        &self,
        symbol: &Symbol,
        bars: &[Bar],
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        if bars.len() < 21 {
            return None;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let last = bars.last()?;
        let avg_volume = volumes[..volumes.len() - 1].iter().sum::<f64>()
            / (volumes.len() - 1) as f64;
        let volume_ratio = if avg_volume > 0.0 {
            last.volume / avg_volume
        } else {
            0.0
        };

        let atr_series = technical_indicators::atr(bars, 14);
        let atr = atr_series.last().copied().unwrap_or(0.0);
        if atr <= 0.0 {
            return None;
        }

        let rsi = technical_indicators::rsi(&closes, 14).last().copied();
        let vwap = technical_indicators::session_vwap(bars).last().copied();
        let bb = technical_indicators::bollinger_bands(&closes, 20, 2.0);

        let mut hits: Vec<SetupHit> = Vec::new();

        // Opening Range Breakout
        if let Some((range_high, range_low)) = self.opening_range(bars) {
            if last.close > range_high && volume_ratio >= 2.0 {
                hits.push(SetupHit {
                    name: "Opening Range Breakout",
                    base_score: 70.0,
                    long: true,
                });
            } else if last.close < range_low && volume_ratio >= 2.0 {
                hits.push(SetupHit {
                    name: "Opening Range Breakdown",
                    base_score: 70.0,
                    long: false,
                });
            }
        }

        // Momentum Breakout: move over the last 10 minutes plus volume
        if closes.len() >= 11 {
            let base = closes[closes.len() - 11];
            if base > 0.0 {
                let move_pct = (last.close - base) / base * 100.0;
                if move_pct.abs() >= self.profile.intraday_price_threshold_pct
                    && volume_ratio >= self.profile.intraday_volume_threshold_x
                {
                    hits.push(SetupHit {
                        name: "Momentum Breakout",
                        base_score: 75.0,
                        long: move_pct > 0.0,
                    });
                }
            }
        }

        // VWAP Reversal: touch of VWAP +/- N ATR with stretched RSI
        if let (Some(vwap), Some(rsi)) = (vwap, rsi) {
            if (last.close - vwap).abs() <= self.profile.vwap_touch_atr * atr {
                if rsi < 35.0 {
                    hits.push(SetupHit {
                        name: "VWAP Reversal",
                        base_score: 65.0,
                        long: true,
                    });
                } else if rsi > 65.0 {
                    hits.push(SetupHit {
                        name: "VWAP Reversal",
                        base_score: 65.0,
                        long: false,
                    });
                }
            }
        }

        // Volume Surge: last minute vs the 20-minute mean with a real move
        if volumes.len() >= 21 {
            let mean20 = volumes[volumes.len() - 21..volumes.len() - 1]
                .iter()
                .sum::<f64>()
                / 20.0;
            let prev_close = closes[closes.len() - 2];
            let change_pct = if prev_close > 0.0 {
                (last.close - prev_close) / prev_close * 100.0
            } else {
                0.0
            };
            if mean20 > 0.0 && last.volume >= 5.0 * mean20 && change_pct.abs() >= 1.0 {
                hits.push(SetupHit {
                    name: "Volume Surge",
                    base_score: 70.0,
                    long: change_pct > 0.0,
                });
            }
        }

        // Bollinger Breakout: close outside the 20-bar 2-sigma band
        if let (Some(upper), Some(lower)) = (bb.upper.last(), bb.lower.last()) {
            if volume_ratio >= 1.5 {
                if last.close > *upper {
                    hits.push(SetupHit {
                        name: "Bollinger Breakout",
                        base_score: 65.0,
                        long: true,
                    });
                } else if last.close < *lower {
                    hits.push(SetupHit {
                        name: "Bollinger Breakdown",
                        base_score: 65.0,
                        long: false,
                    });
                }
            }
        }

        let best = hits
            .into_iter()
            .max_by(|a, b| a.base_score.total_cmp(&b.base_score))?;

        // Setup strength + ATR-normalized move + confirmations
        let move_atr = if closes.len() >= 11 {
            (last.close - closes[closes.len() - 11]).abs() / atr
        } else {
            0.0
        };
        let mut score = best.base_score + (move_atr * 10.0).min(15.0);
        if volume_ratio >= 2.0 {
            score += 5.0;
        }
        if let Some(rsi) = rsi {
            let favorable = if best.long { rsi < 70.0 } else { rsi > 30.0 };
            if favorable {
                score += 5.0;
            }
        }
        if let Some(vwap) = vwap {
            let confirming = if best.long {
                last.close >= vwap
            } else {
                last.close <= vwap
            };
            if confirming && best.name != "VWAP Reversal" {
                score += 5.0;
            }
        }
        let score = score.min(100.0);

        if score < self.profile.intraday_min_score {
            return None;
        }

        // ATR-parameterized levels: 1 ATR risk, 1.8 ATR minimum reward
        let entry = last.close;
        let (stop, target) = if best.long {
            (entry - atr, entry + 1.8 * atr)
        } else {
            (entry + atr, entry - 1.8 * atr)
        };

        Some(Candidate {
            symbol: symbol.clone(),
            kind: CandidateKind::IntradayPump,
            score,
            reasons: vec![
                format!("{} ({})", best.name, if best.long { "long" } else { "short" }),
                format!("volume {:.1}x average", volume_ratio),
                format!("move {:.1} ATR", move_atr),
            ],
            detected_at: now,
            payload: CandidatePayload::Intraday {
                setup: best.name.to_string(),
                price: last.close,
                volume_ratio,
                entry,
                stop,
                target,
            },
        })
    }

    /// High/low of the 09:30-09:35 ET range, when those bars are present.
    fn opening_range(&self, bars: &[Bar]) -> Option<(f64, f64)> {
        let mut high = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut found = false;
        for bar in bars {
            let et = bar.ts.with_timezone(&New_York);
            let minutes = et.hour() * 60 + et.minute();
            if (9 * 60 + 30..OPENING_RANGE_END_MIN).contains(&minutes) {
                high = high.max(bar.high);
                low = low.min(bar.low);
                found = true;
            }
        }
        found.then_some((high, low))
    }

    pub fn open_candidate_count(&self) -> usize {
        self.open_candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Price source returning a canned minute series.
    struct CannedBars {
        bars: Mutex<Vec<Bar>>,
    }

    #[async_trait]
    impl PriceSource for CannedBars {
        async fn fetch_daily(
            &self,
            _symbol: &Symbol,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Bar>, SignalError> {
            Err(SignalError::Empty("unused".to_string()))
        }

        async fn fetch_intraday(
            &self,
            _symbol: &Symbol,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Bar>, SignalError> {
            Ok(self.bars.lock().unwrap().clone())
        }
    }

    fn minute_bars(symbol: &Symbol, start: DateTime<Utc>, count: usize) -> Vec<Bar> {
        (0..count)
            .map(|i| Bar {
                symbol: symbol.clone(),
                ts: start + Duration::minutes(i as i64),
                open: 100.0,
                high: 100.6,
                low: 99.4,
                close: 100.0,
                volume: 10_000.0,
            })
            .collect()
    }

    fn surge_last_bar(bars: &mut [Bar]) {
        // 5x the 20-minute mean volume with a >1% move
        let last = bars.last_mut().unwrap();
        last.volume = 60_000.0;
        last.close = 101.5;
        last.high = 101.8;
    }

    fn et(h: u32, m: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(2025, 6, 2, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn scanner_with(
        bars: Vec<Bar>,
        profile: ScanProfile,
    ) -> (Arc<IntradayScanner>, tokio::sync::mpsc::Receiver<Candidate>) {
        let symbol = Symbol::new("TSLA").unwrap();
        let watchlist = Arc::new(Watchlist::new([symbol]));
        let (tx, rx) = CandidateTx::channel(64);
        let scanner = Arc::new(IntradayScanner::new(
            Arc::new(CannedBars {
                bars: Mutex::new(bars),
            }),
            watchlist,
            Arc::new(MarketClock::default()),
            tx,
            profile,
        ));
        (scanner, rx)
    }

    #[tokio::test]
    async fn test_volume_surge_setup_emits_candidate() {
        let symbol = Symbol::new("TSLA").unwrap();
        let now = et(14, 10);
        let mut bars = minute_bars(&symbol, now - Duration::minutes(59), 60);
        surge_last_bar(&mut bars);

        let (scanner, mut rx) = scanner_with(bars, ScanProfile::standard());
        scanner.tick_once(now).await;

        let candidate = rx.try_recv().expect("candidate expected");
        assert_eq!(candidate.kind, CandidateKind::IntradayPump);
        assert!(candidate.score >= 75.0);
        match &candidate.payload {
            CandidatePayload::Intraday { setup, entry, stop, target, .. } => {
                assert_eq!(setup, "Volume Surge");
                assert!(stop < entry);
                assert!(target > entry);
                // 1.8 ATR reward vs 1 ATR risk
                assert!(((target - entry) / (entry - stop) - 1.8).abs() < 1e-6);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(scanner.open_candidate_count(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat() {
        let symbol = Symbol::new("TSLA").unwrap();
        let now = et(14, 10);
        let mut bars = minute_bars(&symbol, now - Duration::minutes(59), 60);
        surge_last_bar(&mut bars);

        let (scanner, mut rx) = scanner_with(bars, ScanProfile::standard());
        scanner.tick_once(now).await;
        assert!(rx.try_recv().is_ok());

        // 90 seconds later, still inside the 300s cooldown
        scanner.tick_once(now + Duration::seconds(90)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_quiet_tape_emits_nothing() {
        let symbol = Symbol::new("TSLA").unwrap();
        let now = et(14, 10);
        let bars = minute_bars(&symbol, now - Duration::minutes(59), 60);

        let (scanner, mut rx) = scanner_with(bars, ScanProfile::standard());
        scanner.tick_once(now).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_close_emits_exit_and_blocks_entries() {
        let symbol = Symbol::new("TSLA").unwrap();
        let early = et(14, 10);
        let mut bars = minute_bars(&symbol, early - Duration::minutes(59), 60);
        surge_last_bar(&mut bars);

        let (scanner, mut rx) = scanner_with(bars, ScanProfile::standard());
        scanner.tick_once(early).await;
        assert_eq!(rx.try_recv().unwrap().kind, CandidateKind::IntradayPump);

        // 15:45 ET: the open candidate exits
        scanner.tick_once(et(15, 45)).await;
        let exit = rx.try_recv().unwrap();
        assert_eq!(exit.kind, CandidateKind::IntradayExit);
        assert_eq!(scanner.open_candidate_count(), 0);

        // 15:50 ET: no new entries even on a fresh surge
        scanner.tick_once(et(15, 50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_aggressive_lowers_thresholds() {
        let symbol = Symbol::new("TSLA").unwrap();
        let now = et(14, 10);
        // 2.4% move over 10 minutes on 5x last-bar volume: below the
        // standard 3% momentum gate, above the aggressive 2%/3x gate. The
        // choppy history keeps the Bollinger band wide enough that the move
        // stays inside it for the standard profile.
        let mut bars = minute_bars(&symbol, now - Duration::minutes(59), 60);
        let n = bars.len();
        for (i, bar) in bars.iter_mut().enumerate().take(n - 11) {
            bar.close = if i % 2 == 0 { 99.0 } else { 101.0 };
            bar.open = bar.close;
            bar.high = bar.close + 0.6;
            bar.low = bar.close - 0.6;
        }
        for (i, bar) in bars.iter_mut().enumerate().skip(n - 11) {
            let step = (i as f64 - (n - 11) as f64) * 0.24;
            bar.close = 100.0 + step;
            bar.open = bar.close;
            bar.high = bar.close + 0.6;
            bar.low = bar.close - 0.6;
        }
        bars.last_mut().unwrap().volume = 50_000.0;

        let (standard, mut std_rx) = scanner_with(bars.clone(), ScanProfile::standard());
        standard.tick_once(now).await;
        assert!(std_rx.try_recv().is_err());

        let (aggressive, mut agg_rx) = scanner_with(bars, ScanProfile::aggressive());
        aggressive.tick_once(now).await;
        let candidate = agg_rx.try_recv().expect("aggressive candidate");
        match &candidate.payload {
            CandidatePayload::Intraday { setup, .. } => {
                assert_eq!(setup, "Momentum Breakout")
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
